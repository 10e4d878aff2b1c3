use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::classifier::{CachedClassifier, InfraClassifier, RepositoryListing};
use crate::config::ConductorConfig;
use crate::delegation::github::GitHubCodingAgent;
use crate::github::GitHubClient;
use crate::scanner::{DirectoryScanner, EvidenceScanner, GitIndexScanner};
use crate::workflows::{
    DirectoryLock, FileCheckpointStore, GraphSettings, RunStatus, WorkflowEngine, WorkflowGraph,
    WorkflowRun,
};

pub mod classify;
pub mod decide;
pub mod recover;
pub mod runs;
pub mod start;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub async fn scan_repository(path: &Path, use_git_index: bool) -> Result<RepositoryListing> {
    let listing = if use_git_index {
        GitIndexScanner::new(path).scan().await
    } else {
        DirectoryScanner::new(path).scan().await
    };
    listing.with_context(|| format!("Failed to scan {}", path.display()))
}

pub fn checkpoint_store(config: &ConductorConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(&config.persistence.checkpoint_directory)
        .with_integrity_checks(config.persistence.enable_integrity_checks)
}

/// Run `f` against an engine that owns the checkpoint directory
pub async fn with_engine<F, Fut, R>(config: &ConductorConfig, f: F) -> Result<R>
where
    F: FnOnce(WorkflowEngine) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let mut lock = DirectoryLock::open(&config.persistence.checkpoint_directory)?;
    let _guard = lock
        .try_acquire()
        .context("Another iac-conductor process is using the checkpoint directory")?;

    print!("🔄 Connecting to GitHub... ");
    std::io::Write::flush(&mut std::io::stdout())?;
    let client = match GitHubClient::new(&config.github) {
        Ok(client) => {
            println!("✅");
            client
        }
        Err(e) => {
            println!("❌");
            return Err(e.into());
        }
    };

    let agent = GitHubCodingAgent::new(
        client,
        config.github.delegation_label.clone(),
        config.github.agent_assignee.clone(),
    );
    let classifier = InfraClassifier::new(config.classifier_settings())?;
    let graph_settings: GraphSettings = config.graph_settings();

    let engine = WorkflowEngine::builder(Arc::new(agent))
        .graph(WorkflowGraph::standard(&graph_settings)?)
        .classifier(CachedClassifier::new(classifier, config.classifier.cache_capacity))
        .store(Arc::new(checkpoint_store(config)))
        .poll_policy(config.poll_policy())
        .approval_expiry(config.approval_expiry())
        .build()?;

    f(engine).await
}

pub fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "⏳",
        RunStatus::Running => "🔄",
        RunStatus::Suspended => "⏸️",
        RunStatus::Retrying => "🔁",
        RunStatus::Succeeded => "✅",
        RunStatus::Failed => "❌",
        RunStatus::Skipped => "⏭️",
        RunStatus::Cancelled => "🛑",
    }
}

pub fn print_run_summary(run: &WorkflowRun) {
    println!("{} {} [{}]", status_icon(run.status), run.id, run.status);
    println!("   📦 Repository: {}", run.target_repo_id);
    println!("   📍 Node: {}", run.current_node);
    if let Some(classification) = &run.state.classification {
        println!(
            "   🔎 Dialect: {} ({:.2})",
            classification.dialect, classification.confidence
        );
    }
    if let Some(task) = &run.state.task {
        println!("   🤖 Delegation: {} ({})", task.external_ref, task.status);
    }
    if let Some(artifact) = &run.state.artifact {
        println!("   📄 Artifact: {artifact}");
    }
    if let Some(gate) = run.state.gate.as_ref().filter(|g| g.is_pending()) {
        println!("   ✋ Awaiting approval: {} at {}", gate.gate_id, gate.node_id);
    }
    if let Some(failure) = &run.failure {
        println!("   💥 Failure: {failure}");
    }
}

pub async fn show_how_to_get_started() -> Result<()> {
    println!("🏗️  iac-conductor - IaC detection and delegated change workflows");
    println!();
    println!("To get started:");
    println!("  🔎 iac-conductor classify <path>                       # Detect the IaC dialect");
    println!("  🚀 iac-conductor start <path> --repository owner/name  # Start a workflow run");
    println!("  📋 iac-conductor runs                                  # List runs");
    println!();
    println!("Operator commands:");
    println!("  👍 iac-conductor approve <run>    👎 iac-conductor reject <run>");
    println!("  🛑 iac-conductor cancel <run>     ♻️  iac-conductor recover");
    Ok(())
}
