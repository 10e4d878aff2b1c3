use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::error::FailureReason;
use crate::approval::ApprovalGate;
use crate::classifier::{ClassificationResult, RepositoryListing};
use crate::delegation::DelegatedTask;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Retrying,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Retrying => "retrying",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything a run is started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    /// Repository identity, used as the mutation lock key
    pub repository: String,
    pub listing: RepositoryListing,
    /// Opaque target-selection descriptor forwarded to the coding agent
    #[serde(default)]
    pub target: serde_json::Value,
}

impl RunInput {
    pub fn new(repository: impl Into<String>, listing: RepositoryListing) -> Self {
        Self {
            repository: repository.into(),
            listing,
            target: serde_json::Value::Null,
        }
    }

    pub fn with_target(mut self, target: serde_json::Value) -> Self {
        self.target = target;
        self
    }
}

/// Upstream outputs threaded from node to node and persisted with the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub input: RunInput,
    pub classification: Option<ClassificationResult>,
    pub task: Option<DelegatedTask>,
    pub gate: Option<ApprovalGate>,
    pub artifact: Option<String>,
}

impl RunState {
    pub fn new(input: RunInput) -> Self {
        Self {
            input,
            classification: None,
            task: None,
            gate: None,
            artifact: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordOutcome {
    Advanced { to: NodeId },
    Finished { status: RunStatus },
    Suspended { gate_id: String },
    Resumed { gate_id: String },
    Failed,
}

/// One node execution, appended once the node's outcome is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub node: NodeId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub outcome: RecordOutcome,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub target_repo_id: String,
    pub current_node: NodeId,
    pub status: RunStatus,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<NodeExecutionRecord>,
    pub failure: Option<FailureReason>,
    pub cancel_requested: bool,
    pub archived: bool,
    /// Attempts made on `current_node` so far
    pub attempt: u32,
    /// First attempt start on `current_node`
    pub node_started_at: Option<DateTime<Utc>>,
    /// Whether `current_node` is waiting for a scheduled re-check
    pub awaiting_recheck: bool,
    pub correlation_id: String,
}

impl WorkflowRun {
    pub fn new(
        id: RunId,
        entry: NodeId,
        input: RunInput,
        correlation_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target_repo_id: input.repository.clone(),
            current_node: entry,
            status: RunStatus::Pending,
            state: RunState::new(input),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            failure: None,
            cancel_requested: false,
            archived: false,
            attempt: 0,
            node_started_at: None,
            awaiting_recheck: false,
            correlation_id,
        }
    }

    /// Append the record for the current node and reset per-node counters
    pub(crate) fn record(
        &mut self,
        outcome: RecordOutcome,
        error_detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.history.push(NodeExecutionRecord {
            node: self.current_node.clone(),
            started_at: self.node_started_at.unwrap_or(now),
            ended_at: now,
            attempt_count: self.attempt,
            outcome,
            error_detail,
        });
        self.attempt = 0;
        self.node_started_at = None;
        self.awaiting_recheck = false;
        self.updated_at = now;
    }

    /// Number of history records for `node`
    pub fn executions_of(&self, node: &str) -> usize {
        self.history.iter().filter(|r| r.node.as_str() == node).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        let terminal = [
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Skipped,
            RunStatus::Cancelled,
        ];
        for status in terminal {
            assert!(status.is_terminal());
        }
        let active = [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Suspended,
            RunStatus::Retrying,
        ];
        for status in active {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn test_record_resets_node_counters() {
        let now = Utc::now();
        let input = RunInput::new("acme/platform", RepositoryListing::default());
        let mut run = WorkflowRun::new(
            RunId::generate(),
            NodeId::from("classify"),
            input,
            "c-1".to_string(),
            now,
        );
        run.attempt = 2;
        run.node_started_at = Some(now);

        run.record(RecordOutcome::Advanced { to: NodeId::from("delegate") }, None, now);

        assert_eq!(run.history.len(), 1);
        assert_eq!(run.history[0].attempt_count, 2);
        assert_eq!(run.attempt, 0);
        assert!(run.node_started_at.is_none());
        assert_eq!(run.executions_of("classify"), 1);
    }
}
