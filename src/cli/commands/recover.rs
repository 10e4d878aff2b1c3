use anyhow::Result;

use super::{print_run_summary, with_engine, Command};
use crate::config::ConductorConfig;

pub struct RecoverCommand {
    pub config: ConductorConfig,
}

impl Command for RecoverCommand {
    async fn execute(&self) -> Result<()> {
        with_engine(&self.config, |engine| async move {
            let recovered = engine.recover().await?;
            if recovered.is_empty() {
                println!("📋 No unfinished runs to recover");
                return Ok(());
            }

            println!("♻️  Recovering {} runs", recovered.len());
            for run_id in &recovered {
                let run = engine.wait_until_settled(run_id).await?;
                print_run_summary(&run);
            }
            Ok(())
        })
        .await
    }
}
