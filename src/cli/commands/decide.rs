use anyhow::Result;

use super::{print_run_summary, with_engine, Command};
use crate::approval::GateDecision;
use crate::config::ConductorConfig;
use crate::workflows::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Decide(GateDecision),
    Cancel,
}

/// Approve, reject, or cancel one run, then follow it until it settles
pub struct DecideCommand {
    pub run_id: String,
    pub action: OperatorAction,
    pub config: ConductorConfig,
}

impl Command for DecideCommand {
    async fn execute(&self) -> Result<()> {
        let run_id = RunId::from(self.run_id.as_str());

        with_engine(&self.config, |engine| async move {
            engine.recover().await?;

            match self.action {
                OperatorAction::Decide(decision) => {
                    let gate = engine.resume(&run_id, decision).await?;
                    println!(
                        "✋ Gate {} at {} is now {}",
                        gate.gate_id, gate.node_id, gate.decision
                    );
                }
                OperatorAction::Cancel => {
                    engine.cancel(&run_id).await?;
                    println!("🛑 Cancellation requested for {run_id}");
                }
            }

            let run = engine.wait_until_settled(&run_id).await?;
            println!();
            print_run_summary(&run);
            Ok(())
        })
        .await
    }
}
