use anyhow::{anyhow, Result};

use super::{checkpoint_store, print_run_summary, status_icon, Command};
use crate::config::ConductorConfig;
use crate::workflows::{CheckpointStore, RunId};

/// Read-only view of the checkpoint directory; does not take the engine lock
pub struct RunsCommand {
    pub id: Option<String>,
    pub config: ConductorConfig,
}

impl Command for RunsCommand {
    async fn execute(&self) -> Result<()> {
        let store = checkpoint_store(&self.config);

        if let Some(id) = &self.id {
            let run = store
                .load(&RunId::from(id.as_str()))
                .await?
                .ok_or_else(|| anyhow!("Unknown run: {id}"))?;
            print_run_summary(&run);
            println!();
            println!("📜 History:");
            for record in &run.history {
                println!(
                    "   {} → {:?} (attempts: {}){}",
                    record.node,
                    record.outcome,
                    record.attempt_count,
                    record
                        .error_detail
                        .as_deref()
                        .map(|e| format!(" error: {e}"))
                        .unwrap_or_default()
                );
            }
            return Ok(());
        }

        let runs = store.list().await?;
        if runs.is_empty() {
            println!("📋 No runs recorded in {}", store.directory().display());
            return Ok(());
        }

        println!("📋 {} runs", runs.len());
        for run in &runs {
            println!(
                "{} {}  {:<10} {:<18} {}",
                status_icon(run.status),
                run.id,
                run.status,
                run.current_node,
                run.target_repo_id
            );
        }
        Ok(())
    }
}
