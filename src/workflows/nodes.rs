//! Units of work the executor runs one at a time.
//!
//! A node reads upstream outputs from [`RunState`], may write its own output
//! back, and reports a [`NodeOutcome`]. Nodes never sleep: a node that must
//! wait for something external returns `Pending` and the executor schedules
//! the re-check.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::NodeError;
use super::graph::EdgeSignal;
use super::run::{NodeId, RunId, RunState, RunStatus};
use crate::approval::{GateDecision, Resumption};
use crate::classifier::{CachedClassifier, CloudProvider, Dialect};
use crate::clock::Clock;
use crate::delegation::poller::{PollStep, PollingManager, TimeoutPolicy};
use crate::delegation::{DelegationRequest, TaskStatus};
use crate::notify::{Milestone, Notification, NotificationSink};

pub const CLASSIFY: &str = "classify";
pub const CONFIRM_DIALECT: &str = "confirm_dialect";
pub const DELEGATE: &str = "delegate";
pub const AWAIT_DELEGATION: &str = "await_delegation";
pub const REVIEW_CHANGE: &str = "review_change";
pub const NOTIFY: &str = "notify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowNode {
    Classify,
    /// Suspend until a human decides
    ApprovalGate,
    Delegate,
    AwaitDelegation,
    Notify,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Classified(Dialect),
    Submitted { external_ref: String },
    /// Not done yet; run the node again after the delay
    Pending { recheck_after: Duration },
    DelegationFinished { artifact: String },
    Suspend { resumption: Resumption },
    Approved,
    Notified,
}

impl NodeOutcome {
    pub fn signal(&self) -> EdgeSignal {
        match self {
            NodeOutcome::Classified(dialect) => EdgeSignal::Classified(*dialect),
            NodeOutcome::Approved => EdgeSignal::Approved,
            _ => EdgeSignal::Done,
        }
    }

    /// Milestone announced once the outcome has been checkpointed
    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            NodeOutcome::Classified(_) => Some(Milestone::Classified),
            NodeOutcome::Submitted { .. } => Some(Milestone::Delegated),
            _ => None,
        }
    }
}

/// Collaborators shared by every node of an engine
#[derive(Clone)]
pub struct NodeServices {
    pub classifier: CachedClassifier,
    pub poller: PollingManager,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Clock,
}

pub struct NodeContext<'a> {
    pub run_id: &'a RunId,
    pub node_id: &'a NodeId,
    pub state: &'a mut RunState,
    pub services: &'a NodeServices,
}

impl WorkflowNode {
    pub async fn execute(&self, ctx: &mut NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        match self {
            WorkflowNode::Classify => classify(ctx).await,
            WorkflowNode::ApprovalGate => Ok(NodeOutcome::Suspend {
                resumption: Resumption::NextNode,
            }),
            WorkflowNode::Delegate => delegate(ctx).await,
            WorkflowNode::AwaitDelegation => await_delegation(ctx).await,
            WorkflowNode::Notify => notify(ctx).await,
        }
    }
}

async fn classify(ctx: &mut NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
    if let Some(existing) = &ctx.state.classification {
        return Ok(NodeOutcome::Classified(existing.dialect));
    }

    let result = ctx.services.classifier.classify(&ctx.state.input.listing).await?;
    info!(
        run.id = %ctx.run_id,
        dialect = %result.dialect,
        confidence = result.confidence,
        evidence = result.evidence.len(),
        "Repository classified"
    );
    let dialect = result.dialect;
    ctx.state.classification = Some(result);
    Ok(NodeOutcome::Classified(dialect))
}

async fn delegate(ctx: &mut NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
    if let Some(task) = &ctx.state.task {
        debug!(
            run.id = %ctx.run_id,
            external_ref = %task.external_ref,
            "Delegation already recorded"
        );
        return Ok(NodeOutcome::Submitted {
            external_ref: task.external_ref.clone(),
        });
    }

    let classification = ctx
        .state
        .classification
        .as_ref()
        .ok_or_else(|| NodeError::Validation("classification missing".to_string()))?;

    // A confirmed ambiguous classification delegates the leading candidate
    let dialect = classification
        .dialect
        .detected()
        .or_else(|| classification.leading_candidate().map(|c| c.dialect))
        .ok_or_else(|| NodeError::Validation("no dialect to delegate".to_string()))?;

    let request = DelegationRequest {
        run_id: ctx.run_id.to_string(),
        repository: ctx.state.input.repository.clone(),
        dialect,
        cloud_provider: classification.cloud_provider.clone(),
        layout: classification.suggested_layout.clone(),
        target: ctx.state.input.target.clone(),
    };

    let task = ctx.services.poller.submit(&request).await?;
    let external_ref = task.external_ref.clone();
    ctx.state.task = Some(task);
    Ok(NodeOutcome::Submitted { external_ref })
}

async fn await_delegation(ctx: &mut NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
    let poller = &ctx.services.poller;
    let RunState { task, gate, artifact, .. } = &mut *ctx.state;
    let task = task
        .as_mut()
        .ok_or_else(|| NodeError::Validation("no delegated task".to_string()))?;

    // An approved escalation buys one more timeout window
    if let Some(gate) = gate.as_mut() {
        if gate.node_id == ctx.node_id.as_str()
            && gate.decision == GateDecision::Approved
            && !gate.applied
        {
            poller.extend_deadline(task);
            gate.applied = true;
        }
    }

    match poller.poll_once(task).await? {
        PollStep::Wait(delay) => Ok(NodeOutcome::Pending { recheck_after: delay }),
        PollStep::Completed(reference) => {
            *artifact = Some(reference.clone());
            Ok(NodeOutcome::DelegationFinished { artifact: reference })
        }
        PollStep::Failed(reason) => Err(NodeError::DelegationFailed {
            external_ref: task.external_ref.clone(),
            reason,
        }),
        PollStep::DeadlineReached => match poller.policy().on_timeout {
            TimeoutPolicy::Fail => {
                if task.status != TaskStatus::TimedOut {
                    poller.expire(task)?;
                }
                Err(NodeError::DelegationTimeout {
                    external_ref: task.external_ref.clone(),
                })
            }
            TimeoutPolicy::Escalate => {
                info!(
                    external_ref = %task.external_ref,
                    "Delegation overdue, escalating to approval"
                );
                Ok(NodeOutcome::Suspend {
                    resumption: Resumption::Reenter,
                })
            }
        },
    }
}

async fn notify(ctx: &mut NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
    let notification = Notification {
        run_id: ctx.run_id.to_string(),
        timestamp: ctx.services.clock.now(),
        milestone: Milestone::Completed,
        payload: milestone_payload(ctx.run_id, ctx.state, RunStatus::Succeeded, None),
    };
    ctx.services
        .notifier
        .emit(&notification)
        .await
        .map_err(|err| NodeError::Transient(err.to_string()))?;
    Ok(NodeOutcome::Notified)
}

/// Payload shared by every milestone notification of a run
pub(crate) fn milestone_payload(
    run_id: &RunId,
    state: &RunState,
    status: RunStatus,
    error: Option<&str>,
) -> serde_json::Value {
    let classification = state.classification.as_ref();
    json!({
        "workflow_id": run_id.as_str(),
        "status": status,
        "repository": state.input.repository,
        "dialect": classification.map(|c| c.dialect),
        "confidence": classification.map(|c| c.confidence),
        "cloud_provider": classification
            .map(|c| &c.cloud_provider)
            .and_then(CloudProvider::name),
        "external_ref": state.task.as_ref().map(|t| t.external_ref.as_str()),
        "artifact": state.artifact,
        "gate_id": state.gate.as_ref().filter(|g| g.is_pending()).map(|g| g.gate_id.as_str()),
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RepositoryListing;
    use crate::delegation::poller::PollPolicy;
    use crate::delegation::{AgentStatus, DelegationError, MockCodingAgent};
    use crate::notify::BroadcastNotifier;
    use crate::workflows::run::RunInput;

    fn services(
        agent: MockCodingAgent,
        policy: PollPolicy,
    ) -> (NodeServices, Arc<BroadcastNotifier>) {
        let clock = Clock::new();
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let services = NodeServices {
            classifier: CachedClassifier::new(Default::default(), 16),
            poller: PollingManager::new(Arc::new(agent), policy, clock.clone()),
            notifier: notifier.clone(),
            clock,
        };
        (services, notifier)
    }

    fn context<'a>(
        run_id: &'a RunId,
        node_id: &'a NodeId,
        state: &'a mut RunState,
        services: &'a NodeServices,
    ) -> NodeContext<'a> {
        NodeContext {
            run_id,
            node_id,
            state,
            services,
        }
    }

    fn state(paths: &[&str]) -> RunState {
        RunState::new(RunInput::new(
            "acme/platform",
            RepositoryListing::from_paths(paths.iter().copied()),
        ))
    }

    #[tokio::test]
    async fn test_classify_is_computed_once() {
        let (services, _) = services(MockCodingAgent::new(), PollPolicy::default());
        let run_id = RunId::from("run-1");
        let node_id = NodeId::from(CLASSIFY);
        let mut state = state(&["infra/main.tf"]);

        let mut ctx = context(&run_id, &node_id, &mut state, &services);
        let outcome = WorkflowNode::Classify.execute(&mut ctx).await.unwrap();
        assert_eq!(outcome, NodeOutcome::Classified(Dialect::Terraform));

        state.input.listing = RepositoryListing::from_paths(["main.bicep"]);
        let mut ctx = context(&run_id, &node_id, &mut state, &services);
        let outcome = WorkflowNode::Classify.execute(&mut ctx).await.unwrap();
        assert_eq!(outcome, NodeOutcome::Classified(Dialect::Terraform));
    }

    #[tokio::test]
    async fn test_delegate_never_resubmits_a_recorded_task() {
        let mut agent = MockCodingAgent::new();
        agent.expect_find_submission().times(1).returning(|_| Ok(None));
        agent.expect_submit().times(1).returning(|_| Ok("17".to_string()));
        let (services, _) = services(agent, PollPolicy::default());

        let run_id = RunId::from("run-1");
        let mut state = state(&["main.tf"]);
        for node in [CLASSIFY, DELEGATE, DELEGATE] {
            let node_id = NodeId::from(node);
            let mut ctx = context(&run_id, &node_id, &mut state, &services);
            let kind = if node == CLASSIFY {
                WorkflowNode::Classify
            } else {
                WorkflowNode::Delegate
            };
            kind.execute(&mut ctx).await.unwrap();
        }
        assert_eq!(state.task.as_ref().map(|t| t.external_ref.as_str()), Some("17"));
    }

    #[tokio::test]
    async fn test_transient_submit_errors_surface_as_transient() {
        let mut agent = MockCodingAgent::new();
        agent
            .expect_find_submission()
            .returning(|_| Err(DelegationError::Transient("503".to_string())));
        let (services, _) = services(agent, PollPolicy::default());

        let run_id = RunId::from("run-1");
        let mut state = state(&["main.tf"]);
        let classify_id = NodeId::from(CLASSIFY);
        let mut ctx = context(&run_id, &classify_id, &mut state, &services);
        WorkflowNode::Classify.execute(&mut ctx).await.unwrap();

        let delegate_id = NodeId::from(DELEGATE);
        let mut ctx = context(&run_id, &delegate_id, &mut state, &services);
        let err = WorkflowNode::Delegate.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err, NodeError::Transient("503".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_delegation_reports_pending_then_artifact() {
        let mut agent = MockCodingAgent::new();
        agent.expect_find_submission().returning(|_| Ok(None));
        agent.expect_submit().returning(|_| Ok("17".to_string()));
        let mut seq = mockall::Sequence::new();
        agent
            .expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(AgentStatus::InProgress));
        agent
            .expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(AgentStatus::Completed { artifact: "change#42".to_string() }));
        let (services, _) = services(agent, PollPolicy::default());

        let run_id = RunId::from("run-1");
        let mut state = state(&["main.tf"]);
        let setup = [
            (CLASSIFY, WorkflowNode::Classify),
            (DELEGATE, WorkflowNode::Delegate),
        ];
        for (node, kind) in setup {
            let node_id = NodeId::from(node);
            let mut ctx = context(&run_id, &node_id, &mut state, &services);
            kind.execute(&mut ctx).await.unwrap();
        }

        let node_id = NodeId::from(AWAIT_DELEGATION);
        let mut ctx = context(&run_id, &node_id, &mut state, &services);
        assert_eq!(
            WorkflowNode::AwaitDelegation.execute(&mut ctx).await.unwrap(),
            NodeOutcome::Pending { recheck_after: Duration::from_secs(5) }
        );
        let mut ctx = context(&run_id, &node_id, &mut state, &services);
        assert_eq!(
            WorkflowNode::AwaitDelegation.execute(&mut ctx).await.unwrap(),
            NodeOutcome::DelegationFinished { artifact: "change#42".to_string() }
        );
        assert_eq!(state.artifact.as_deref(), Some("change#42"));
    }

    #[tokio::test]
    async fn test_notify_emits_completed_with_artifact() {
        let (services, notifier) = services(MockCodingAgent::new(), PollPolicy::default());
        let mut events = notifier.subscribe();

        let run_id = RunId::from("run-1");
        let node_id = NodeId::from(NOTIFY);
        let mut state = state(&["main.tf"]);
        state.artifact = Some("change#42".to_string());
        let mut ctx = context(&run_id, &node_id, &mut state, &services);
        assert_eq!(WorkflowNode::Notify.execute(&mut ctx).await.unwrap(), NodeOutcome::Notified);

        let event = events.recv().await.unwrap();
        assert_eq!(event.milestone, Milestone::Completed);
        assert_eq!(event.artifact(), Some("change#42"));
        assert_eq!(event.payload["workflow_id"], "run-1");
        assert_eq!(event.payload["status"], "succeeded");
    }
}
