use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::checkpoint::PersistenceError;
use super::graph::GraphError;
use super::run::RunStatus;
use crate::approval::{ApprovalError, GateDecision};
use crate::classifier::ClassifierError;
use crate::delegation::DelegationError;

/// Errors a node reports to the executor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// Bad input; never retried
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Retried according to the node's retry policy
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Delegation {external_ref} timed out")]
    DelegationTimeout { external_ref: String },

    #[error("Delegation {external_ref} failed: {reason}")]
    DelegationFailed { external_ref: String, reason: String },
}

impl From<ClassifierError> for NodeError {
    fn from(err: ClassifierError) -> Self {
        NodeError::Validation(err.to_string())
    }
}

impl From<DelegationError> for NodeError {
    fn from(err: DelegationError) -> Self {
        match err {
            DelegationError::Transient(message) => NodeError::Transient(message),
            other => NodeError::Validation(other.to_string()),
        }
    }
}

/// Why a run ended `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("validation error in {node}: {message}")]
    Validation { node: String, message: String },

    #[error("{node} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        node: String,
        attempts: u32,
        last_error: String,
    },

    #[error("delegation {external_ref} timed out")]
    DelegationTimeout { external_ref: String },

    #[error("delegation {external_ref} failed: {reason}")]
    DelegationFailed { external_ref: String, reason: String },

    #[error("approval gate {gate_id} expired")]
    ApprovalExpired { gate_id: String },
}

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Invalid run input: {0}")]
    InvalidInput(String),

    #[error("Run {run_id} is {status}, not suspended")]
    NotSuspended { run_id: String, status: RunStatus },

    #[error("Decision must be approved, rejected or expired, got {0}")]
    InvalidDecision(GateDecision),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EngineError {
    /// Whether this is a decision on an already-decided gate
    pub fn is_already_decided(&self) -> bool {
        matches!(self, EngineError::Approval(ApprovalError::AlreadyDecided { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_delegation_errors_stay_transient() {
        let err: NodeError = DelegationError::Transient("502 Bad Gateway".to_string()).into();
        assert_eq!(err, NodeError::Transient("502 Bad Gateway".to_string()));

        let err: NodeError = DelegationError::Rejected("401".to_string()).into();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[test]
    fn test_failure_reason_serializes_with_tag() {
        let reason = FailureReason::DelegationTimeout {
            external_ref: "17".to_string(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "delegation_timeout");
        assert_eq!(json["external_ref"], "17");
    }

    #[test]
    fn test_delegation_failure_keeps_its_reason_field() {
        let failure = FailureReason::DelegationFailed {
            external_ref: "17".to_string(),
            reason: "plan rejected".to_string(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "delegation_failed");
        assert_eq!(json["reason"], "plan rejected");

        let back: FailureReason = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }
}
