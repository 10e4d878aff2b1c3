//! Human approval gates: named suspend/resume points.
//!
//! A gate is bound to one run and one decision point. Its decision starts
//! `Pending` and can be set exactly once; every later attempt is rejected
//! with [`ApprovalError::AlreadyDecided`] and leaves the gate untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApprovalError {
    #[error("Gate {gate_id} was already decided: {decision}")]
    AlreadyDecided { gate_id: String, decision: GateDecision },

    #[error("Unknown gate: {0}")]
    UnknownGate(String),

    #[error("A gate cannot be decided as pending")]
    PendingDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateDecision::Pending => "pending",
            GateDecision::Approved => "approved",
            GateDecision::Rejected => "rejected",
            GateDecision::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Where an approved run continues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resumption {
    /// Follow the requesting node's approval edge
    NextNode,
    /// Run the requesting node again
    Reenter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub gate_id: String,
    pub run_id: String,
    pub node_id: String,
    pub requested_at: DateTime<Utc>,
    pub decision: GateDecision,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub resumption: Resumption,
    /// Set once the requesting node has acted on an approval
    #[serde(default)]
    pub applied: bool,
}

impl ApprovalGate {
    pub fn is_pending(&self) -> bool {
        self.decision == GateDecision::Pending
    }
}

/// Details of a gate request
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub run_id: String,
    pub node_id: String,
    pub resumption: Resumption,
    pub requested_at: DateTime<Utc>,
    pub expiry: Option<Duration>,
}

/// In-memory index of gates owned by the engine
#[derive(Debug, Default)]
pub struct ApprovalDesk {
    gates: RwLock<HashMap<String, ApprovalGate>>,
}

impl ApprovalDesk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` gate
    pub async fn request(&self, request: GateRequest) -> ApprovalGate {
        let expires_at = request
            .expiry
            .and_then(|expiry| chrono::TimeDelta::from_std(expiry).ok())
            .map(|window| request.requested_at + window);

        let gate = ApprovalGate {
            gate_id: format!("gate-{}", Uuid::new_v4()),
            run_id: request.run_id,
            node_id: request.node_id,
            requested_at: request.requested_at,
            decision: GateDecision::Pending,
            decided_at: None,
            expires_at,
            resumption: request.resumption,
            applied: false,
        };

        info!(
            gate.id = %gate.gate_id,
            run.id = %gate.run_id,
            node = %gate.node_id,
            expires_at = ?gate.expires_at,
            "Approval requested"
        );
        self.gates.write().await.insert(gate.gate_id.clone(), gate.clone());
        gate
    }

    /// Record a decision. Succeeds exactly once per gate.
    pub async fn decide(
        &self,
        gate_id: &str,
        decision: GateDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<ApprovalGate, ApprovalError> {
        if decision == GateDecision::Pending {
            return Err(ApprovalError::PendingDecision);
        }

        let mut gates = self.gates.write().await;
        let gate = gates
            .get_mut(gate_id)
            .ok_or_else(|| ApprovalError::UnknownGate(gate_id.to_string()))?;

        if !gate.is_pending() {
            return Err(ApprovalError::AlreadyDecided {
                gate_id: gate_id.to_string(),
                decision: gate.decision,
            });
        }

        gate.decision = decision;
        gate.decided_at = Some(decided_at);
        info!(gate.id = %gate_id, run.id = %gate.run_id, decision = %decision, "Gate decided");
        Ok(gate.clone())
    }

    pub async fn get(&self, gate_id: &str) -> Option<ApprovalGate> {
        self.gates.read().await.get(gate_id).cloned()
    }

    /// Re-register a gate loaded from a checkpoint
    pub async fn restore(&self, gate: ApprovalGate) {
        self.gates.write().await.insert(gate.gate_id.clone(), gate);
    }

    pub async fn remove(&self, gate_id: &str) -> Option<ApprovalGate> {
        self.gates.write().await.remove(gate_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.gates.read().await.values().filter(|g| g.is_pending()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_request(expiry: Option<Duration>) -> GateRequest {
        GateRequest {
            run_id: "run-1".to_string(),
            node_id: "review_change".to_string(),
            resumption: Resumption::NextNode,
            requested_at: Utc::now(),
            expiry,
        }
    }

    #[tokio::test]
    async fn test_gate_starts_pending() {
        let desk = ApprovalDesk::new();
        let gate = desk.request(gate_request(None)).await;

        assert_eq!(gate.decision, GateDecision::Pending);
        assert!(gate.expires_at.is_none());
        assert_eq!(desk.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_decide_succeeds_exactly_once() {
        let desk = ApprovalDesk::new();
        let gate = desk.request(gate_request(None)).await;

        let decided = desk
            .decide(&gate.gate_id, GateDecision::Approved, Utc::now())
            .await
            .unwrap();
        assert_eq!(decided.decision, GateDecision::Approved);

        let err = desk
            .decide(&gate.gate_id, GateDecision::Rejected, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApprovalError::AlreadyDecided {
                gate_id: gate.gate_id.clone(),
                decision: GateDecision::Approved
            }
        );

        let unchanged = desk.get(&gate.gate_id).await.unwrap();
        assert_eq!(unchanged, decided);
    }

    #[tokio::test]
    async fn test_expired_is_distinct_from_rejected() {
        let desk = ApprovalDesk::new();
        let gate = desk.request(gate_request(Some(Duration::from_secs(3600)))).await;
        assert!(gate.expires_at.is_some());

        let decided = desk
            .decide(&gate.gate_id, GateDecision::Expired, Utc::now())
            .await
            .unwrap();
        assert_eq!(decided.decision, GateDecision::Expired);
        assert_ne!(decided.decision, GateDecision::Rejected);
    }

    #[tokio::test]
    async fn test_pending_is_not_a_decision() {
        let desk = ApprovalDesk::new();
        let gate = desk.request(gate_request(None)).await;
        let err = desk
            .decide(&gate.gate_id, GateDecision::Pending, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, ApprovalError::PendingDecision);
    }

    #[tokio::test]
    async fn test_unknown_gate() {
        let desk = ApprovalDesk::new();
        let err = desk
            .decide("gate-missing", GateDecision::Approved, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, ApprovalError::UnknownGate("gate-missing".to_string()));
    }
}
