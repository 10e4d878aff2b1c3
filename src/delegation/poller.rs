use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    AgentStatus, CodingAgent, DelegatedTask, DelegationError, DelegationRequest, TaskStatus,
};
use crate::clock::Clock;
use crate::observability::engine_metrics;

/// What happens when a delegation outlives its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// End the run `Failed` with `DelegationTimeout`
    #[default]
    Fail,
    /// Suspend at an approval gate; approval grants another timeout window
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive transient poll errors tolerated before the task fails
    pub error_ceiling: u32,
    pub on_timeout: TimeoutPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            error_ceiling: 3,
            on_timeout: TimeoutPolicy::Fail,
        }
    }
}

/// Result of one scheduled re-check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Not complete yet; check again after the delay
    Wait(Duration),
    Completed(String),
    Failed(String),
    DeadlineReached,
}

/// Submits delegations and observes their completion one re-check at a time
#[derive(Clone)]
pub struct PollingManager {
    agent: Arc<dyn CodingAgent>,
    policy: PollPolicy,
    clock: Clock,
}

impl std::fmt::Debug for PollingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PollingManager {
    pub fn new(agent: Arc<dyn CodingAgent>, policy: PollPolicy, clock: Clock) -> Self {
        Self { agent, policy, clock }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    fn timeout_window(&self) -> TimeDelta {
        TimeDelta::from_std(self.policy.timeout).unwrap_or_else(|_| TimeDelta::days(36_500))
    }

    /// Submit unless the agent already holds a submission for this request
    pub async fn submit(
        &self,
        request: &DelegationRequest,
    ) -> Result<DelegatedTask, DelegationError> {
        let key = request.idempotency_key();
        let external_ref = match self.agent.find_submission(key).await? {
            Some(existing) => {
                info!(
                    run.id = %request.run_id,
                    external_ref = %existing,
                    "Reattached to existing delegation"
                );
                existing
            }
            None => {
                let created = self.agent.submit(request).await?;
                info!(
                    run.id = %request.run_id,
                    external_ref = %created,
                    dialect = %request.dialect,
                    "Delegation submitted"
                );
                created
            }
        };

        let now = self.clock.now();
        Ok(DelegatedTask::submitted(external_ref, now, now + self.timeout_window()))
    }

    /// Perform one re-check of `task`.
    ///
    /// Terminal tasks report their final state again without contacting the
    /// agent. Transient agent errors count as "not complete" until
    /// `error_ceiling` consecutive errors have been seen.
    pub async fn poll_once(&self, task: &mut DelegatedTask) -> Result<PollStep, DelegationError> {
        match task.status {
            TaskStatus::Completed => {
                return Ok(PollStep::Completed(task.artifact.clone().unwrap_or_default()))
            }
            TaskStatus::Failed => {
                return Ok(PollStep::Failed(task.failure.clone().unwrap_or_default()))
            }
            TaskStatus::TimedOut => return Ok(PollStep::DeadlineReached),
            TaskStatus::Submitted | TaskStatus::InProgress => {}
        }

        let now = self.clock.now();
        if now >= task.deadline {
            return Ok(PollStep::DeadlineReached);
        }

        let response = self.agent.poll(&task.external_ref).await;
        task.poll_count += 1;
        task.last_polled_at = Some(now);
        engine_metrics().record_poll();

        match response {
            Ok(AgentStatus::InProgress) => {
                task.consecutive_errors = 0;
                task.advance(TaskStatus::InProgress, now)?;
                debug!(
                    external_ref = %task.external_ref,
                    polls = task.poll_count,
                    "Delegation in progress"
                );
                Ok(PollStep::Wait(self.next_delay(task)))
            }
            Ok(AgentStatus::Completed { artifact }) => {
                task.consecutive_errors = 0;
                task.advance(TaskStatus::Completed, now)?;
                task.artifact = Some(artifact.clone());
                info!(
                    external_ref = %task.external_ref,
                    artifact = %artifact,
                    polls = task.poll_count,
                    "Delegation completed"
                );
                Ok(PollStep::Completed(artifact))
            }
            Ok(AgentStatus::Failed { reason }) => {
                task.advance(TaskStatus::Failed, now)?;
                task.failure = Some(reason.clone());
                warn!(external_ref = %task.external_ref, reason = %reason, "Delegation failed");
                Ok(PollStep::Failed(reason))
            }
            Err(error) if error.is_transient() => {
                task.consecutive_errors += 1;
                if task.consecutive_errors >= self.policy.error_ceiling {
                    let reason = format!(
                        "{} consecutive poll errors, last: {}",
                        task.consecutive_errors, error
                    );
                    task.advance(TaskStatus::Failed, now)?;
                    task.failure = Some(reason.clone());
                    warn!(
                        external_ref = %task.external_ref,
                        reason = %reason,
                        "Poll error ceiling reached"
                    );
                    return Ok(PollStep::Failed(reason));
                }
                warn!(
                    external_ref = %task.external_ref,
                    consecutive_errors = task.consecutive_errors,
                    error = %error,
                    "Transient poll error, treating as not complete"
                );
                Ok(PollStep::Wait(self.next_delay(task)))
            }
            Err(error) => {
                let reason = error.to_string();
                task.advance(TaskStatus::Failed, now)?;
                task.failure = Some(reason.clone());
                warn!(
                    external_ref = %task.external_ref,
                    reason = %reason,
                    "Delegation poll rejected"
                );
                Ok(PollStep::Failed(reason))
            }
        }
    }

    /// The interval, shortened so the last re-check lands on the deadline
    fn next_delay(&self, task: &DelegatedTask) -> Duration {
        let remaining = (task.deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        self.policy.interval.min(remaining)
    }

    /// Mark an overdue task as timed out
    pub fn expire(&self, task: &mut DelegatedTask) -> Result<(), DelegationError> {
        task.advance(TaskStatus::TimedOut, self.clock.now())
    }

    /// Grant an overdue task one more timeout window starting now
    pub fn extend_deadline(&self, task: &mut DelegatedTask) {
        task.deadline = self.clock.now() + self.timeout_window();
        task.deadline_extensions += 1;
        task.consecutive_errors = 0;
        info!(
            external_ref = %task.external_ref,
            deadline = %task.deadline,
            extensions = task.deadline_extensions,
            "Delegation deadline extended"
        );
    }
}
