use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "iac-conductor")]
#[command(about = "Detect infrastructure-as-code dialects and delegate changes to a coding agent")]
#[command(long_about = "iac-conductor classifies a repository as Terraform or Bicep, \
                       delegates the requested change to a coding agent through GitHub \
                       issues, and tracks every run as a durable, resumable workflow. \
                       Start with 'iac-conductor classify <path>'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a local repository without starting a workflow
    Classify {
        /// Repository root
        path: PathBuf,
        /// Read the listing from the git index instead of walking the directory
        #[arg(long, help = "Use tracked files from the git index")]
        git: bool,
        /// Print the full result as JSON
        #[arg(long, help = "Print the classification result as JSON")]
        json: bool,
    },
    /// Start a workflow run for a repository and follow it until it settles
    Start {
        /// Repository root
        path: PathBuf,
        /// Repository identity, e.g. owner/name
        #[arg(long, help = "Repository identity used for locking and delegation")]
        repository: String,
        #[arg(long, help = "Use tracked files from the git index")]
        git: bool,
        /// Target-selection descriptor forwarded to the coding agent, as JSON
        #[arg(long, help = "JSON target descriptor forwarded to the coding agent")]
        target: Option<String>,
    },
    /// List stored runs, or show one run in detail
    Runs {
        #[arg(long, help = "Show a single run")]
        id: Option<String>,
    },
    /// Approve the pending gate of a suspended run
    Approve { run_id: String },
    /// Reject the pending gate of a suspended run
    Reject { run_id: String },
    /// Request cancellation of a run
    Cancel { run_id: String },
    /// Continue every non-terminal run from its last checkpoint
    Recover,
}
