//! Drives workflow runs through the graph.
//!
//! Each run has exactly one driver task at a time. A driver executes the
//! current node, checkpoints the result, then routes to the next node. Node
//! execution happens without holding the run lock, so status queries and
//! cancellation requests never wait on a slow node. Cancellation is observed
//! only at node boundaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn, Instrument};

use super::checkpoint::{CheckpointStore, MemoryCheckpointStore, PersistenceError};
use super::error::{EngineError, FailureReason, NodeError};
use super::graph::{EdgeSignal, GraphError, GraphSettings, NodeSpec, Route, WorkflowGraph};
use super::locks::RepositoryLocks;
use super::nodes::{milestone_payload, NodeContext, NodeOutcome, NodeServices};
use super::run::{RecordOutcome, RunId, RunInput, RunStatus, WorkflowRun};
use crate::approval::{
    ApprovalDesk, ApprovalError, ApprovalGate, GateDecision, GateRequest, Resumption,
};
use crate::classifier::CachedClassifier;
use crate::clock::Clock;
use crate::delegation::poller::{PollPolicy, PollingManager};
use crate::delegation::CodingAgent;
use crate::notify::{Milestone, Notification, NotificationSink, TracingNotifier};
use crate::observability::{engine_metrics, OperationTimer};
use crate::telemetry::{create_run_span, generate_correlation_id};

/// What the driver does after one step
enum Flow {
    Continue,
    Sleep(Duration),
    /// Suspended or finished; the driver exits
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    status: RunStatus,
    /// The driver stopped because a checkpoint could not be written
    halted: bool,
}

struct RunSlot {
    run: Mutex<WorkflowRun>,
    cancel: AtomicBool,
    wake: Notify,
    /// Set while a driver task owns the run; only changed under the run lock
    driving: AtomicBool,
    progress: watch::Sender<Progress>,
}

impl RunSlot {
    fn new(run: WorkflowRun) -> Self {
        let (progress, _) = watch::channel(Progress {
            status: run.status,
            halted: false,
        });
        Self {
            cancel: AtomicBool::new(run.cancel_requested),
            run: Mutex::new(run),
            wake: Notify::new(),
            driving: AtomicBool::new(false),
            progress,
        }
    }

    fn publish(&self, status: RunStatus) {
        self.progress.send_replace(Progress { status, halted: false });
    }
}

struct EngineInner {
    graph: WorkflowGraph,
    services: NodeServices,
    store: Arc<dyn CheckpointStore>,
    desk: ApprovalDesk,
    locks: RepositoryLocks,
    runs: RwLock<HashMap<RunId, Arc<RunSlot>>>,
    approval_expiry: Option<Duration>,
}

/// Workflow engine handle; clones share the same engine
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

pub struct EngineBuilder {
    agent: Arc<dyn CodingAgent>,
    graph: Option<WorkflowGraph>,
    classifier: Option<CachedClassifier>,
    notifier: Arc<dyn NotificationSink>,
    store: Arc<dyn CheckpointStore>,
    poll_policy: PollPolicy,
    approval_expiry: Option<Duration>,
    clock: Option<Clock>,
}

impl EngineBuilder {
    pub fn graph(mut self, graph: WorkflowGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn classifier(mut self, classifier: CachedClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn approval_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.approval_expiry = expiry;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, EngineError> {
        let graph = match self.graph {
            Some(graph) => graph,
            None => WorkflowGraph::standard(&GraphSettings::default())?,
        };
        let clock = self.clock.unwrap_or_default();
        let services = NodeServices {
            classifier: self
                .classifier
                .unwrap_or_else(|| CachedClassifier::new(Default::default(), 1024)),
            poller: PollingManager::new(self.agent, self.poll_policy, clock),
            notifier: self.notifier,
            clock,
        };

        Ok(WorkflowEngine {
            inner: Arc::new(EngineInner {
                graph,
                services,
                store: self.store,
                desk: ApprovalDesk::new(),
                locks: RepositoryLocks::new(),
                runs: RwLock::new(HashMap::new()),
                approval_expiry: self.approval_expiry,
            }),
        })
    }
}

impl WorkflowEngine {
    pub fn builder(agent: Arc<dyn CodingAgent>) -> EngineBuilder {
        EngineBuilder {
            agent,
            graph: None,
            classifier: None,
            notifier: Arc::new(TracingNotifier),
            store: Arc::new(MemoryCheckpointStore::new()),
            poll_policy: PollPolicy::default(),
            approval_expiry: None,
            clock: None,
        }
    }

    /// Create a run, checkpoint it, and start driving it
    pub async fn start(&self, input: RunInput) -> Result<RunId, EngineError> {
        self.inner.start(input).await
    }

    /// Decide the pending gate of a suspended run
    pub async fn resume(
        &self,
        run_id: &RunId,
        decision: GateDecision,
    ) -> Result<ApprovalGate, EngineError> {
        self.inner.resume(run_id, decision).await
    }

    /// Decide a gate by its id
    pub async fn decide(
        &self,
        gate_id: &str,
        decision: GateDecision,
    ) -> Result<ApprovalGate, EngineError> {
        let run_id = match self.inner.desk.get(gate_id).await {
            Some(gate) => RunId::from(gate.run_id),
            // Archived runs no longer hold their gate on the desk
            None => self
                .inner
                .store
                .list()
                .await?
                .into_iter()
                .find(|run| run.state.gate.as_ref().is_some_and(|g| g.gate_id == gate_id))
                .map(|run| run.id)
                .ok_or_else(|| ApprovalError::UnknownGate(gate_id.to_string()))?,
        };
        self.inner.resume(&run_id, decision).await
    }

    /// Latest state of a run, live or archived
    pub async fn status(&self, run_id: &RunId) -> Result<WorkflowRun, EngineError> {
        self.inner.status(run_id).await
    }

    /// Request cancellation; observed at the next node boundary
    pub async fn cancel(&self, run_id: &RunId) -> Result<WorkflowRun, EngineError> {
        self.inner.cancel(run_id).await
    }

    /// Reload every non-terminal run from the store and continue it
    pub async fn recover(&self) -> Result<Vec<RunId>, EngineError> {
        self.inner.recover().await
    }

    pub async fn list(&self) -> Result<Vec<WorkflowRun>, EngineError> {
        self.inner.list().await
    }

    /// Wait until the run's status satisfies `predicate`, or its driver halts
    pub async fn wait_for<F>(
        &self,
        run_id: &RunId,
        predicate: F,
    ) -> Result<WorkflowRun, EngineError>
    where
        F: Fn(RunStatus) -> bool,
    {
        let slot = self.inner.slot(run_id).await;
        let Some(slot) = slot else {
            return self.inner.status(run_id).await;
        };

        let mut progress = slot.progress.subscribe();
        // The sender lives in `slot`, so the channel cannot close here
        let _ = progress.wait_for(|p| p.halted || predicate(p.status)).await;
        let run = slot.run.lock().await.clone();
        Ok(run)
    }

    /// Wait until the run is terminal, suspended, or halted
    pub async fn wait_until_settled(&self, run_id: &RunId) -> Result<WorkflowRun, EngineError> {
        self.wait_for(run_id, |status| status.is_terminal() || status == RunStatus::Suspended)
            .await
    }

    pub fn approvals(&self) -> &ApprovalDesk {
        &self.inner.desk
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.inner.graph
    }
}

impl EngineInner {
    async fn slot(&self, run_id: &RunId) -> Option<Arc<RunSlot>> {
        self.runs.read().await.get(run_id).cloned()
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.services.clock.now()
    }

    async fn start(self: &Arc<Self>, input: RunInput) -> Result<RunId, EngineError> {
        let repository = input.repository.trim().to_string();
        if repository.is_empty() {
            return Err(EngineError::InvalidInput("repository must not be empty".to_string()));
        }
        let input = RunInput { repository, ..input };

        let run = WorkflowRun::new(
            RunId::generate(),
            self.graph.entry().clone(),
            input,
            generate_correlation_id(),
            self.now(),
        );
        self.store.save(&run).await?;

        let run_id = run.id.clone();
        info!(
            run.id = %run_id,
            repository = %run.target_repo_id,
            correlation.id = %run.correlation_id,
            "Workflow run started"
        );
        engine_metrics().record_run_started();
        self.emit(&run, Milestone::Started, None).await;

        let slot = Arc::new(RunSlot::new(run));
        slot.driving.store(true, Ordering::SeqCst);
        self.runs.write().await.insert(run_id.clone(), slot.clone());
        self.spawn_driver(slot);
        Ok(run_id)
    }

    fn spawn_driver(self: &Arc<Self>, slot: Arc<RunSlot>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.drive(slot).await });
    }

    async fn drive(self: Arc<Self>, slot: Arc<RunSlot>) {
        let span = {
            let run = slot.run.lock().await;
            create_run_span(run.id.as_str(), &run.target_repo_id, &run.correlation_id)
        };

        async {
            loop {
                match self.step(&slot).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Sleep(delay)) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = slot.wake.notified() => debug!("Driver woken early"),
                        }
                    }
                    Ok(Flow::Exit) => break,
                    Err(err) => {
                        engine_metrics().record_checkpoint_failure();
                        error!(error = %err, "Checkpoint failed, halting run driver");
                        let run = slot.run.lock().await;
                        slot.driving.store(false, Ordering::SeqCst);
                        slot.progress.send_replace(Progress {
                            status: run.status,
                            halted: true,
                        });
                        break;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn checkpoint(&self, slot: &RunSlot, run: &WorkflowRun) -> Result<(), PersistenceError> {
        self.store.save(run).await?;
        slot.publish(run.status);
        Ok(())
    }

    /// Release the driver; must be called with the run lock held
    fn exit(slot: &RunSlot) -> Flow {
        slot.driving.store(false, Ordering::SeqCst);
        Flow::Exit
    }

    async fn step(self: &Arc<Self>, slot: &RunSlot) -> Result<Flow, PersistenceError> {
        let (spec, mut state, run_id, repository) = {
            let mut run = slot.run.lock().await;

            if run.status.is_terminal() {
                return Ok(Self::exit(slot));
            }

            if slot.cancel.load(Ordering::SeqCst) || run.cancel_requested {
                run.cancel_requested = true;
                self.finish(slot, &mut run, RunStatus::Cancelled, None).await?;
                return Ok(Self::exit(slot));
            }

            let spec = match self.graph.node(&run.current_node) {
                Ok(spec) => spec,
                Err(err) => {
                    let reason = FailureReason::Validation {
                        node: run.current_node.to_string(),
                        message: err.to_string(),
                    };
                    self.finish(slot, &mut run, RunStatus::Failed, Some(reason)).await?;
                    return Ok(Self::exit(slot));
                }
            };

            if run.status == RunStatus::Suspended {
                return self.apply_gate_decision(slot, &mut run, spec).await;
            }

            if let Some(missing) = spec.missing_input(&run.state) {
                let message = format!("required input {missing:?} is missing");
                let now = self.now();
                run.record(RecordOutcome::Failed, Some(message.clone()), now);
                let reason = FailureReason::Validation {
                    node: spec.id.to_string(),
                    message,
                };
                self.finish(slot, &mut run, RunStatus::Failed, Some(reason)).await?;
                return Ok(Self::exit(slot));
            }

            if !run.awaiting_recheck {
                let now = self.now();
                run.attempt += 1;
                run.node_started_at.get_or_insert(now);
                run.status = RunStatus::Running;
                run.updated_at = now;
                self.checkpoint(slot, &run).await?;
                debug!(node = %spec.id, attempt = run.attempt, "Entering node");
            }

            (spec, run.state.clone(), run.id.clone(), run.target_repo_id.clone())
        };

        let guard = if spec.mutates_repository {
            Some(self.locks.acquire(&repository).await)
        } else {
            None
        };
        let timer = OperationTimer::new(spec.id.as_str());
        let result = {
            let mut ctx = NodeContext {
                run_id: &run_id,
                node_id: &spec.id,
                state: &mut state,
                services: &self.services,
            };
            spec.node.execute(&mut ctx).await
        };
        drop(guard);
        timer.finish();

        let mut run = slot.run.lock().await;
        run.state = state;
        self.apply_result(slot, &mut run, spec, result).await
    }

    async fn apply_result(
        self: &Arc<Self>,
        slot: &RunSlot,
        run: &mut WorkflowRun,
        spec: &NodeSpec,
        result: Result<NodeOutcome, NodeError>,
    ) -> Result<Flow, PersistenceError> {
        let now = self.now();
        match result {
            Ok(NodeOutcome::Pending { recheck_after }) => {
                run.awaiting_recheck = true;
                run.updated_at = now;
                self.checkpoint(slot, run).await?;
                Ok(Flow::Sleep(recheck_after))
            }
            Ok(NodeOutcome::Suspend { resumption }) => {
                self.suspend(slot, run, spec, resumption).await?;
                Ok(Self::exit(slot))
            }
            Ok(outcome) => {
                let route = self.graph.route(&spec.id, &outcome.signal());
                self.advance(slot, run, route, outcome.milestone()).await
            }
            Err(NodeError::Transient(message)) if spec.retry.allows_retry_after(run.attempt) => {
                let delay = spec.retry.backoff(run.attempt);
                engine_metrics().record_node_retry();
                warn!(
                    node = %spec.id,
                    attempt = run.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Transient node failure, retrying"
                );
                run.status = RunStatus::Retrying;
                run.awaiting_recheck = false;
                run.updated_at = now;
                self.checkpoint(slot, run).await?;
                Ok(Flow::Sleep(delay))
            }
            Err(err) => {
                let reason = match &err {
                    NodeError::Transient(message) => FailureReason::RetriesExhausted {
                        node: spec.id.to_string(),
                        attempts: run.attempt,
                        last_error: message.clone(),
                    },
                    NodeError::Validation(message) => FailureReason::Validation {
                        node: spec.id.to_string(),
                        message: message.clone(),
                    },
                    NodeError::DelegationTimeout { external_ref } => {
                        FailureReason::DelegationTimeout {
                            external_ref: external_ref.clone(),
                        }
                    }
                    NodeError::DelegationFailed {
                        external_ref,
                        reason,
                    } => FailureReason::DelegationFailed {
                        external_ref: external_ref.clone(),
                        reason: reason.clone(),
                    },
                };
                run.record(RecordOutcome::Failed, Some(err.to_string()), now);
                self.finish(slot, run, RunStatus::Failed, Some(reason)).await?;
                Ok(Self::exit(slot))
            }
        }
    }

    async fn advance(
        &self,
        slot: &RunSlot,
        run: &mut WorkflowRun,
        route: Result<Route, GraphError>,
        milestone: Option<Milestone>,
    ) -> Result<Flow, PersistenceError> {
        let now = self.now();
        match route {
            Ok(Route::Next(next)) => {
                debug!(from = %run.current_node, to = %next, "Advancing");
                run.record(RecordOutcome::Advanced { to: next.clone() }, None, now);
                run.current_node = next;
                run.status = RunStatus::Running;
                self.checkpoint(slot, run).await?;
                if let Some(milestone) = milestone {
                    self.emit(run, milestone, None).await;
                }
                Ok(Flow::Continue)
            }
            Ok(Route::Finish(status)) => {
                run.record(RecordOutcome::Finished { status }, None, now);
                if let Some(milestone) = milestone {
                    self.emit(run, milestone, None).await;
                }
                self.finish(slot, run, status, None).await?;
                Ok(Self::exit(slot))
            }
            Err(err) => {
                let reason = FailureReason::Validation {
                    node: run.current_node.to_string(),
                    message: err.to_string(),
                };
                run.record(RecordOutcome::Failed, Some(err.to_string()), now);
                self.finish(slot, run, RunStatus::Failed, Some(reason)).await?;
                Ok(Self::exit(slot))
            }
        }
    }

    async fn suspend(
        self: &Arc<Self>,
        slot: &RunSlot,
        run: &mut WorkflowRun,
        spec: &NodeSpec,
        resumption: Resumption,
    ) -> Result<(), PersistenceError> {
        let now = self.now();
        let gate = self
            .desk
            .request(GateRequest {
                run_id: run.id.to_string(),
                node_id: spec.id.to_string(),
                resumption,
                requested_at: now,
                expiry: self.approval_expiry,
            })
            .await;

        if let Some(previous) = run.state.gate.replace(gate.clone()) {
            self.desk.remove(&previous.gate_id).await;
        }
        run.record(
            RecordOutcome::Suspended {
                gate_id: gate.gate_id.clone(),
            },
            None,
            now,
        );
        run.status = RunStatus::Suspended;
        self.checkpoint(slot, run).await?;

        info!(node = %spec.id, gate.id = %gate.gate_id, "Run suspended awaiting approval");
        self.emit(run, Milestone::Suspended, None).await;
        self.arm_expiry(&gate);
        Ok(())
    }

    /// Arm the expiry timer of a pending gate
    fn arm_expiry(self: &Arc<Self>, gate: &ApprovalGate) {
        let Some(expires_at) = gate.expires_at else {
            return;
        };
        let delay = (expires_at - self.now()).to_std().unwrap_or(Duration::ZERO);
        let engine: Weak<Self> = Arc::downgrade(self);
        let run_id = RunId::from(gate.run_id.as_str());
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                match engine.resume(&run_id, GateDecision::Expired).await {
                    Ok(_) => info!(run.id = %run_id, "Approval gate expired"),
                    Err(err) => debug!(run.id = %run_id, error = %err, "Gate expiry not applied"),
                }
            }
        });
    }

    async fn apply_gate_decision(
        &self,
        slot: &RunSlot,
        run: &mut WorkflowRun,
        spec: &NodeSpec,
    ) -> Result<Flow, PersistenceError> {
        let Some(gate) = run.state.gate.clone() else {
            let reason = FailureReason::Validation {
                node: spec.id.to_string(),
                message: "suspended without an approval gate".to_string(),
            };
            self.finish(slot, run, RunStatus::Failed, Some(reason)).await?;
            return Ok(Self::exit(slot));
        };

        match (gate.decision, gate.resumption) {
            (GateDecision::Pending, _) => Ok(Self::exit(slot)),
            (GateDecision::Approved, Resumption::NextNode) => {
                if let Some(current) = run.state.gate.as_mut() {
                    current.applied = true;
                }
                let route = self.graph.route(&spec.id, &EdgeSignal::Approved);
                self.advance(slot, run, route, None).await
            }
            (GateDecision::Approved, Resumption::Reenter) => {
                debug!(node = %spec.id, gate.id = %gate.gate_id, "Re-entering node after approval");
                run.status = RunStatus::Running;
                run.updated_at = self.now();
                self.checkpoint(slot, run).await?;
                Ok(Flow::Continue)
            }
            (GateDecision::Rejected, _) => {
                self.finish(slot, run, RunStatus::Cancelled, None).await?;
                Ok(Self::exit(slot))
            }
            (GateDecision::Expired, _) => {
                let reason = FailureReason::ApprovalExpired {
                    gate_id: gate.gate_id.clone(),
                };
                self.finish(slot, run, RunStatus::Failed, Some(reason)).await?;
                Ok(Self::exit(slot))
            }
        }
    }

    /// Move a run to a terminal status and archive it
    async fn finish(
        &self,
        slot: &RunSlot,
        run: &mut WorkflowRun,
        status: RunStatus,
        failure: Option<FailureReason>,
    ) -> Result<(), PersistenceError> {
        run.status = status;
        run.failure = failure;
        run.archived = true;
        run.updated_at = self.now();
        self.checkpoint(slot, run).await?;

        if let Some(gate) = &run.state.gate {
            self.desk.remove(&gate.gate_id).await;
        }
        self.runs.write().await.remove(&run.id);

        let metrics = engine_metrics();
        match status {
            RunStatus::Succeeded => metrics.record_run_succeeded(),
            RunStatus::Failed => metrics.record_run_failed(),
            RunStatus::Skipped => metrics.record_run_skipped(),
            RunStatus::Cancelled => metrics.record_run_cancelled(),
            _ => {}
        }

        let error = run.failure.as_ref().map(|f| f.to_string());
        match &run.failure {
            Some(reason) => warn!(status = %status, reason = %reason, "Workflow run finished"),
            None => info!(status = %status, "Workflow run finished"),
        }

        let milestone = match status {
            RunStatus::Failed => Some(Milestone::Failed),
            RunStatus::Skipped => Some(Milestone::Skipped),
            RunStatus::Cancelled => Some(Milestone::Cancelled),
            _ => None,
        };
        if let Some(milestone) = milestone {
            self.emit(run, milestone, error.as_deref()).await;
        }
        Ok(())
    }

    async fn emit(&self, run: &WorkflowRun, milestone: Milestone, error: Option<&str>) {
        let notification = Notification {
            run_id: run.id.to_string(),
            timestamp: self.now(),
            milestone,
            payload: milestone_payload(&run.id, &run.state, run.status, error),
        };
        if let Err(err) = self.services.notifier.emit(&notification).await {
            warn!(
                run.id = %run.id,
                milestone = %milestone,
                error = %err,
                "Notification not delivered"
            );
        }
    }

    async fn resume(
        self: &Arc<Self>,
        run_id: &RunId,
        decision: GateDecision,
    ) -> Result<ApprovalGate, EngineError> {
        if decision == GateDecision::Pending {
            return Err(EngineError::InvalidDecision(decision));
        }

        let Some(slot) = self.slot(run_id).await else {
            let run = self
                .store
                .load(run_id)
                .await?
                .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
            return Err(Self::undecidable(&run));
        };

        let mut run = slot.run.lock().await;
        let pending = run.state.gate.as_ref().is_some_and(ApprovalGate::is_pending);
        if run.status != RunStatus::Suspended || !pending {
            return Err(Self::undecidable(&run));
        }

        let Some(gate_id) = run.state.gate.as_ref().map(|g| g.gate_id.clone()) else {
            return Err(Self::undecidable(&run));
        };
        let decided = self.desk.decide(&gate_id, decision, self.now()).await?;
        run.state.gate = Some(decided.clone());
        run.updated_at = self.now();
        self.checkpoint(&slot, &run).await?;

        if !slot.driving.swap(true, Ordering::SeqCst) {
            self.spawn_driver(slot.clone());
        }
        Ok(decided)
    }

    /// Error for a decision on a run that has no pending gate
    fn undecidable(run: &WorkflowRun) -> EngineError {
        match &run.state.gate {
            Some(gate) if !gate.is_pending() => {
                EngineError::Approval(ApprovalError::AlreadyDecided {
                    gate_id: gate.gate_id.clone(),
                    decision: gate.decision,
                })
            }
            _ => EngineError::NotSuspended {
                run_id: run.id.to_string(),
                status: run.status,
            },
        }
    }

    async fn status(&self, run_id: &RunId) -> Result<WorkflowRun, EngineError> {
        if let Some(slot) = self.slot(run_id).await {
            return Ok(slot.run.lock().await.clone());
        }
        self.store
            .load(run_id)
            .await?
            .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))
    }

    async fn cancel(&self, run_id: &RunId) -> Result<WorkflowRun, EngineError> {
        let Some(slot) = self.slot(run_id).await else {
            return self.status(run_id).await;
        };

        slot.cancel.store(true, Ordering::SeqCst);
        let mut run = slot.run.lock().await;
        if run.status.is_terminal() {
            return Ok(run.clone());
        }

        run.cancel_requested = true;
        if slot.driving.load(Ordering::SeqCst) {
            run.updated_at = self.now();
            self.checkpoint(&slot, &run).await?;
            slot.wake.notify_one();
            info!(run.id = %run_id, "Cancellation requested");
        } else {
            self.finish(&slot, &mut run, RunStatus::Cancelled, None).await?;
        }
        Ok(run.clone())
    }

    async fn recover(self: &Arc<Self>) -> Result<Vec<RunId>, EngineError> {
        let mut recovered = Vec::new();
        for run in self.store.list().await? {
            if run.status.is_terminal() || run.archived {
                continue;
            }
            if self.runs.read().await.contains_key(&run.id) {
                continue;
            }

            let run_id = run.id.clone();
            let slot = Arc::new(RunSlot::new(run));
            self.runs.write().await.insert(run_id.clone(), slot.clone());

            let mut run = slot.run.lock().await;
            if run.cancel_requested {
                self.finish(&slot, &mut run, RunStatus::Cancelled, None).await?;
                continue;
            }

            info!(
                run.id = %run_id,
                node = %run.current_node,
                status = %run.status,
                "Recovering workflow run"
            );
            let pending_gate = run.state.gate.clone().filter(|g| g.is_pending());
            if let Some(gate) = &run.state.gate {
                self.desk.restore(gate.clone()).await;
            }

            match pending_gate {
                Some(gate) if run.status == RunStatus::Suspended => self.arm_expiry(&gate),
                _ => {
                    slot.driving.store(true, Ordering::SeqCst);
                    self.spawn_driver(slot.clone());
                }
            }
            recovered.push(run_id);
        }
        Ok(recovered)
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, EngineError> {
        let mut runs = self.store.list().await?;
        let live: Vec<Arc<RunSlot>> = self.runs.read().await.values().cloned().collect();
        for slot in live {
            let snapshot = slot.run.lock().await.clone();
            match runs.iter_mut().find(|r| r.id == snapshot.id) {
                Some(stored) => *stored = snapshot,
                None => runs.push(snapshot),
            }
        }
        Ok(runs)
    }
}
