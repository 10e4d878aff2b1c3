//! Scripted collaborators for driving the workflow engine in tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use iac_conductor::classifier::{IacDialect, RepositoryListing};
use iac_conductor::delegation::{AgentStatus, CodingAgent, DelegationError, DelegationRequest};
use iac_conductor::notify::{Milestone, Notification, NotificationSink, NotifyError};
use iac_conductor::workflows::{
    CheckpointStore, MemoryCheckpointStore, PersistenceError, RunId, WorkflowRun,
};

/// Coding agent that replays a script of poll responses.
///
/// Once the script runs out every poll reports the fallback status. A delegation that
/// reported a final status keeps reporting it. Submissions are remembered by idempotency
/// key so a second engine can reattach to them.
#[derive(Default)]
pub struct ScriptedAgent {
    submissions: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<DelegationRequest>>,
    script: Mutex<VecDeque<Result<AgentStatus, DelegationError>>>,
    /// Reported once the script is exhausted; `InProgress` when unset
    fallback: Option<AgentStatus>,
    /// Terminal status already reported per external reference
    settled: Mutex<HashMap<String, AgentStatus>>,
    transient_submit_failures: AtomicUsize,
    submit_delay: Duration,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn never_completing() -> Self {
        Self::default()
    }

    /// `in_progress` polls report `InProgress`, the next one completes with `artifact`
    pub fn completing_after(in_progress: usize, artifact: &str) -> Self {
        let mut script: VecDeque<_> =
            (0..in_progress).map(|_| Ok(AgentStatus::InProgress)).collect();
        script.push_back(Ok(AgentStatus::Completed {
            artifact: artifact.to_string(),
        }));
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Every poll of every delegation completes with `artifact`
    pub fn always_completing(artifact: &str) -> Self {
        Self {
            fallback: Some(AgentStatus::Completed {
                artifact: artifact.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn failing_after(in_progress: usize, reason: &str) -> Self {
        let mut script: VecDeque<_> =
            (0..in_progress).map(|_| Ok(AgentStatus::InProgress)).collect();
        script.push_back(Ok(AgentStatus::Failed {
            reason: reason.to_string(),
        }));
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    pub fn with_transient_submit_failures(self, failures: usize) -> Self {
        self.transient_submit_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    /// Successful submissions
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_submits(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submitted_dialects(&self) -> Vec<IacDialect> {
        self.requests.lock().unwrap().iter().map(|r| r.dialect).collect()
    }
}

#[async_trait]
impl CodingAgent for ScriptedAgent {
    async fn find_submission(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<String>, DelegationError> {
        Ok(self.submissions.lock().unwrap().get(idempotency_key).cloned())
    }

    async fn submit(&self, request: &DelegationRequest) -> Result<String, DelegationError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failures_left = self.transient_submit_failures.load(Ordering::SeqCst);
        if failures_left > 0 {
            self.transient_submit_failures.store(failures_left - 1, Ordering::SeqCst);
            return Err(DelegationError::Transient("502 Bad Gateway".to_string()));
        }

        let mut submissions = self.submissions.lock().unwrap();
        let external_ref = format!("{}", 100 + submissions.len());
        submissions.insert(request.idempotency_key().to_string(), external_ref.clone());
        self.requests.lock().unwrap().push(request.clone());
        Ok(external_ref)
    }

    async fn poll(&self, external_ref: &str) -> Result<AgentStatus, DelegationError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.settled.lock().unwrap().get(external_ref) {
            return Ok(status.clone());
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone().unwrap_or(AgentStatus::InProgress)));
        match &next {
            Ok(AgentStatus::InProgress) | Err(_) => {}
            Ok(status) => {
                self.settled
                    .lock()
                    .unwrap()
                    .insert(external_ref.to_string(), status.clone());
            }
        }
        next
    }
}

/// Notification sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events_for(&self, run_id: &RunId) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.run_id == run_id.as_str())
            .cloned()
            .collect()
    }

    pub fn milestones(&self, run_id: &RunId) -> Vec<Milestone> {
        self.events_for(run_id).iter().map(|n| n.milestone).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn emit(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Store that stops accepting saves after a fixed number, simulating a crash
pub struct CrashingStore {
    inner: MemoryCheckpointStore,
    saves_left: AtomicUsize,
}

impl CrashingStore {
    pub fn new(inner: MemoryCheckpointStore, successful_saves: usize) -> Self {
        Self {
            inner,
            saves_left: AtomicUsize::new(successful_saves),
        }
    }
}

#[async_trait]
impl CheckpointStore for CrashingStore {
    async fn save(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        let left = self.saves_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(PersistenceError::Unavailable("simulated crash".to_string()));
        }
        self.saves_left.store(left - 1, Ordering::SeqCst);
        self.inner.save(run).await
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError> {
        self.inner.load(run_id).await
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        self.inner.list().await
    }
}

pub fn terraform_listing() -> RepositoryListing {
    RepositoryListing::from_paths(["main.tf", "modules/net/main.tf", "README.md"])
}

pub fn ambiguous_listing() -> RepositoryListing {
    RepositoryListing::from_paths(["main.tf", "main.bicep", "net.bicep"])
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
