//! Delegation of code generation to an external coding agent.
//!
//! `submit` hands work to the agent and returns at once; completion is
//! observed through bounded polling by the [`PollingManager`]. The
//! [`DelegatedTask`] record only ever moves forward through its statuses.

pub mod github;
pub mod poller;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{CloudProvider, IacDialect, SuggestedLayout};

pub use github::GitHubCodingAgent;
pub use poller::{PollPolicy, PollStep, PollingManager, TimeoutPolicy};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DelegationError {
    #[error("Transient collaborator error: {0}")]
    Transient(String),

    #[error("Delegation rejected by collaborator: {0}")]
    Rejected(String),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

impl DelegationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DelegationError::Transient(_))
    }
}

/// Payload handed to the coding agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub run_id: String,
    pub repository: String,
    pub dialect: IacDialect,
    pub cloud_provider: CloudProvider,
    pub layout: Option<SuggestedLayout>,
    /// Target-selection descriptor, forwarded unmodified
    pub target: serde_json::Value,
}

impl DelegationRequest {
    /// Key under which the agent must deduplicate submissions
    pub fn idempotency_key(&self) -> &str {
        &self.run_id
    }
}

/// What the agent reports when polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    InProgress,
    Completed { artifact: String },
    Failed { reason: String },
}

/// Trait for coding agent collaborators so the engine can be tested with mocks
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CodingAgent: Send + Sync {
    /// Look up a submission previously made under `idempotency_key`
    async fn find_submission(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<String>, DelegationError>;

    /// Submit work and return the external reference
    async fn submit(&self, request: &DelegationRequest) -> Result<String, DelegationError>;

    async fn poll(&self, external_ref: &str) -> Result<AgentStatus, DelegationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    InProgress,
    Completed,
    TimedOut,
    Failed,
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Submitted => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed | TaskStatus::TimedOut | TaskStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// Record of work handed to the coding agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub external_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub poll_count: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub artifact: Option<String>,
    pub consecutive_errors: u32,
    pub deadline_extensions: u32,
    pub failure: Option<String>,
    pub transitions: Vec<TaskTransition>,
}

impl DelegatedTask {
    pub fn submitted(
        external_ref: String,
        submitted_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            external_ref,
            submitted_at,
            deadline,
            poll_count: 0,
            last_polled_at: None,
            status: TaskStatus::Submitted,
            artifact: None,
            consecutive_errors: 0,
            deadline_extensions: 0,
            failure: None,
            transitions: Vec::new(),
        }
    }

    /// Move to `to`. Staying in a non-terminal status is a no-op; anything
    /// that would move backward or leave a terminal status is rejected.
    pub(crate) fn advance(
        &mut self,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DelegationError> {
        if to == self.status && !to.is_terminal() {
            return Ok(());
        }
        if self.status.is_terminal() || to.rank() <= self.status.rank() {
            return Err(DelegationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.transitions.push(TaskTransition {
            from: self.status,
            to,
            at,
        });
        self.status = to;
        Ok(())
    }

    /// Number of transitions into `status`
    pub fn transitions_into(&self, status: TaskStatus) -> usize {
        self.transitions.iter().filter(|t| t.to == status).count()
    }
}
