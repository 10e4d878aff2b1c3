use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Started,
    Classified,
    Delegated,
    Completed,
    Suspended,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for Milestone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Milestone::Started => "started",
            Milestone::Classified => "classified",
            Milestone::Delegated => "delegated",
            Milestone::Completed => "completed",
            Milestone::Suspended => "suspended",
            Milestone::Failed => "failed",
            Milestone::Skipped => "skipped",
            Milestone::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub milestone: Milestone,
    pub payload: serde_json::Value,
}

impl Notification {
    /// Artifact reference carried by the payload, if any
    pub fn artifact(&self) -> Option<&str> {
        self.payload.get("artifact").and_then(|a| a.as_str())
    }
}

/// Sink for milestone events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification as a structured log event
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn emit(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&notification.payload)?;
        info!(
            run.id = %notification.run_id,
            milestone = %notification.milestone,
            timestamp = %notification.timestamp,
            payload = %payload,
            "Workflow notification"
        );
        Ok(())
    }
}

/// Fans notifications out to in-process subscribers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn emit(&self, notification: &Notification) -> Result<(), NotifyError> {
        // No subscribers is not a delivery failure.
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(milestone: Milestone) -> Notification {
        Notification {
            run_id: "run-1".to_string(),
            timestamp: Utc::now(),
            milestone,
            payload: serde_json::json!({"workflow_id": "run-1", "artifact": "change#42"}),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut receiver = notifier.subscribe();

        notifier.emit(&notification(Milestone::Completed)).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.milestone, Milestone::Completed);
        assert_eq!(received.artifact(), Some("change#42"));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(8);
        assert!(notifier.emit(&notification(Milestone::Started)).await.is_ok());
    }

    #[tokio::test]
    async fn test_tracing_notifier_accepts_any_payload() {
        assert!(TracingNotifier.emit(&notification(Milestone::Failed)).await.is_ok());
    }
}
