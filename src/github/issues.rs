use governor::DefaultDirectRateLimiter;
use octocrab::models::issues::Issue;
use octocrab::Octocrab;
use std::sync::Arc;
use tracing::info;

use super::errors::GitHubError;
use super::pagination::{find_in_pages, PER_PAGE};

/// Handler for GitHub issue operations
#[derive(Debug, Clone)]
pub struct IssueHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl IssueHandler {
    pub fn new(
        octocrab: Octocrab,
        owner: String,
        repo: String,
        rate_limiter: Arc<DefaultDirectRateLimiter>,
    ) -> Self {
        Self {
            octocrab,
            owner,
            repo,
            rate_limiter,
        }
    }

    /// First issue (open or closed) carrying `label` that satisfies `matches`,
    /// searching every page; pull requests are skipped
    pub async fn find_labeled_issue(
        &self,
        label: &str,
        mut matches: impl FnMut(&Issue) -> bool,
    ) -> Result<Option<Issue>, GitHubError> {
        let labels = [label.to_string()];
        find_in_pages(
            |page| {
                let labels = &labels;
                async move {
                    self.rate_limiter.until_ready().await;
                    let page = self
                        .octocrab
                        .issues(&self.owner, &self.repo)
                        .list()
                        .state(octocrab::params::State::All)
                        .labels(labels)
                        .per_page(PER_PAGE)
                        .page(page)
                        .send()
                        .await?;
                    Ok::<_, GitHubError>(page.items)
                }
            },
            |issue: &Issue| issue.pull_request.is_none() && matches(issue),
        )
        .await
    }

    /// Fetch a specific issue by number
    pub async fn fetch_issue(&self, issue_number: u64) -> Result<Issue, GitHubError> {
        self.rate_limiter.until_ready().await;
        let issue = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .get(issue_number)
            .await?;
        Ok(issue)
    }

    /// Create a new issue, optionally assigned
    pub async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: Vec<String>,
        assignees: Vec<String>,
    ) -> Result<Issue, GitHubError> {
        self.rate_limiter.until_ready().await;
        let issue = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .create(title)
            .body(body)
            .labels(labels)
            .assignees(assignees)
            .send()
            .await?;

        info!(
            issue.number = issue.number,
            repository = %format!("{}/{}", self.owner, self.repo),
            "Created issue"
        );
        Ok(issue)
    }
}
