use anyhow::Result;
use clap::Parser;

use iac_conductor::approval::GateDecision;
use iac_conductor::cli::commands::classify::ClassifyCommand;
use iac_conductor::cli::commands::decide::{DecideCommand, OperatorAction};
use iac_conductor::cli::commands::recover::RecoverCommand;
use iac_conductor::cli::commands::runs::RunsCommand;
use iac_conductor::cli::commands::start::StartCommand;
use iac_conductor::cli::commands::{show_how_to_get_started, Command};
use iac_conductor::cli::{Cli, Commands};
use iac_conductor::config::ConductorConfig;
use iac_conductor::telemetry::{init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = ConductorConfig::load_env_file();
    let config = ConductorConfig::load()?;
    init_telemetry(&config.observability.log_level, config.observability.json_logs)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match cli.command {
            None => show_how_to_get_started().await,
            Some(Commands::Classify { path, git, json }) => {
                ClassifyCommand {
                    path,
                    use_git_index: git,
                    json,
                    config,
                }
                .execute()
                .await
            }
            Some(Commands::Start {
                path,
                repository,
                git,
                target,
            }) => {
                StartCommand {
                    path,
                    repository,
                    use_git_index: git,
                    target,
                    config,
                }
                .execute()
                .await
            }
            Some(Commands::Runs { id }) => RunsCommand { id, config }.execute().await,
            Some(Commands::Approve { run_id }) => {
                DecideCommand {
                    run_id,
                    action: OperatorAction::Decide(GateDecision::Approved),
                    config,
                }
                .execute()
                .await
            }
            Some(Commands::Reject { run_id }) => {
                DecideCommand {
                    run_id,
                    action: OperatorAction::Decide(GateDecision::Rejected),
                    config,
                }
                .execute()
                .await
            }
            Some(Commands::Cancel { run_id }) => {
                DecideCommand {
                    run_id,
                    action: OperatorAction::Cancel,
                    config,
                }
                .execute()
                .await
            }
            Some(Commands::Recover) => RecoverCommand { config }.execute().await,
        }
    });

    shutdown_telemetry();
    result
}
