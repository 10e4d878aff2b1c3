use anyhow::{Context, Result};
use std::path::PathBuf;

use super::{print_run_summary, scan_repository, with_engine, Command};
use crate::config::ConductorConfig;
use crate::workflows::RunInput;

pub struct StartCommand {
    pub path: PathBuf,
    pub repository: String,
    pub use_git_index: bool,
    pub target: Option<String>,
    pub config: ConductorConfig,
}

impl StartCommand {
    fn target(&self) -> Result<serde_json::Value> {
        match &self.target {
            Some(raw) => serde_json::from_str(raw).context("--target must be valid JSON"),
            None => Ok(serde_json::Value::Null),
        }
    }
}

impl Command for StartCommand {
    async fn execute(&self) -> Result<()> {
        let target = self.target()?;
        let listing = scan_repository(&self.path, self.use_git_index).await?;
        println!("🔎 Scanned {} entries from {}", listing.len(), self.path.display());

        with_engine(&self.config, |engine| async move {
            let input = RunInput::new(self.repository.clone(), listing).with_target(target);
            let run_id = engine.start(input).await?;
            println!("🚀 Started run {run_id}");

            let run = engine.wait_until_settled(&run_id).await?;
            println!();
            print_run_summary(&run);
            Ok(())
        })
        .await
    }
}
