use async_trait::async_trait;
use octocrab::models::IssueState;
use tracing::{debug, info};

use super::{AgentStatus, CodingAgent, DelegationError, DelegationRequest};
use crate::github::{GitHubClient, GitHubError};

impl From<GitHubError> for DelegationError {
    fn from(err: GitHubError) -> Self {
        if err.is_transient() {
            DelegationError::Transient(err.to_string())
        } else {
            DelegationError::Rejected(err.to_string())
        }
    }
}

/// Coding agent driven through GitHub: work is filed as a labelled issue
/// assigned to the agent account, and the pull request that references the
/// issue is the delegation's artifact.
#[derive(Debug, Clone)]
pub struct GitHubCodingAgent {
    client: GitHubClient,
    label: String,
    assignee: Option<String>,
}

impl GitHubCodingAgent {
    pub fn new(client: GitHubClient, label: impl Into<String>, assignee: Option<String>) -> Self {
        Self {
            client,
            label: label.into(),
            assignee,
        }
    }

    /// Hidden marker embedded in the issue body so a submission can be found again
    pub fn submission_marker(idempotency_key: &str) -> String {
        format!("<!-- iac-conductor:run-id={idempotency_key} -->")
    }

    pub fn issue_title(request: &DelegationRequest) -> String {
        format!(
            "Generate {} VM start/stop automation for {}",
            request.dialect, request.repository
        )
    }

    pub fn issue_body(request: &DelegationRequest) -> String {
        let payload = serde_json::to_string_pretty(request).unwrap_or_else(|_| "{}".to_string());
        let mut body = String::new();
        body.push_str("## Infrastructure automation request\n\n");
        body.push_str(&format!("- Dialect: `{}`\n", request.dialect));
        if let Some(provider) = request.cloud_provider.name() {
            body.push_str(&format!("- Cloud provider: `{provider}`\n"));
        }
        if let Some(layout) = &request.layout {
            body.push_str(&format!("- Infrastructure directory: `{}`\n", layout.iac_dir));
            body.push_str(&format!("- Runbooks directory: `{}`\n", layout.runbooks_dir));
        }
        body.push_str("\n```json\n");
        body.push_str(&payload);
        body.push_str("\n```\n\n");
        body.push_str(&Self::submission_marker(request.idempotency_key()));
        body.push('\n');
        body
    }

    fn parse_issue_number(external_ref: &str) -> Result<u64, DelegationError> {
        external_ref
            .trim_start_matches('#')
            .parse()
            .map_err(|_| GitHubError::InvalidReference(external_ref.to_string()).into())
    }
}

#[async_trait]
impl CodingAgent for GitHubCodingAgent {
    async fn find_submission(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<String>, DelegationError> {
        let marker = Self::submission_marker(idempotency_key);
        let issue = self
            .client
            .issues()
            .find_labeled_issue(&self.label, |issue| {
                issue.body.as_deref().is_some_and(|body| body.contains(&marker))
            })
            .await?;
        Ok(issue.map(|issue| issue.number.to_string()))
    }

    async fn submit(&self, request: &DelegationRequest) -> Result<String, DelegationError> {
        let issue = self
            .client
            .issues()
            .create_issue(
                &Self::issue_title(request),
                &Self::issue_body(request),
                vec![self.label.clone()],
                self.assignee.iter().cloned().collect(),
            )
            .await?;

        info!(
            run.id = %request.run_id,
            issue.number = issue.number,
            repository = %self.client.repository(),
            "Delegated to coding agent"
        );
        Ok(issue.number.to_string())
    }

    async fn poll(&self, external_ref: &str) -> Result<AgentStatus, DelegationError> {
        let issue_number = Self::parse_issue_number(external_ref)?;

        if let Some(pr) = self.client.pulls().find_pr_for_issue(issue_number).await? {
            return Ok(AgentStatus::Completed {
                artifact: format!("change#{}", pr.number),
            });
        }

        let issue = self.client.issues().fetch_issue(issue_number).await?;
        if issue.state == IssueState::Closed {
            return Ok(AgentStatus::Failed {
                reason: format!("issue #{issue_number} was closed without a pull request"),
            });
        }

        debug!(issue.number = issue_number, "No pull request yet");
        Ok(AgentStatus::InProgress)
    }
}
