use governor::DefaultDirectRateLimiter;
use octocrab::models::pulls::PullRequest;
use octocrab::Octocrab;
use regex::Regex;
use std::sync::{Arc, OnceLock};

use super::errors::GitHubError;
use super::pagination::{find_in_pages, PER_PAGE};

/// Handler for GitHub pull request operations
#[derive(Debug, Clone)]
pub struct PullRequestHandler {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

/// Compiled regex patterns for issue references, cached using OnceLock
static ISSUE_REFERENCE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn issue_reference_patterns() -> &'static Vec<Regex> {
    ISSUE_REFERENCE_PATTERNS.get_or_init(|| {
        let patterns = [
            r"(?i)\b(?:fix|fixes|fixed|close|closes|closed|resolve|resolves|resolved)\s+#(\d+)",
            r"#(\d+)\b",
        ];

        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Check if a PR body references a specific issue number
pub fn pr_references_issue(body: &str, issue_number: u64) -> bool {
    let issue_str = issue_number.to_string();
    issue_reference_patterns().iter().any(|pattern| {
        pattern
            .captures_iter(body)
            .filter_map(|captures| captures.get(1))
            .any(|number| number.as_str() == issue_str)
    })
}

impl PullRequestHandler {
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

    /// Most recent pull request that references `issue_number` and is open or
    /// merged. Pages are walked newest first until one matches.
    pub async fn find_pr_for_issue(
        &self,
        issue_number: u64,
    ) -> Result<Option<PullRequest>, GitHubError> {
        find_in_pages(
            |page| async move {
                self.rate_limiter.until_ready().await;
                let page = self
                    .octocrab
                    .pulls(&self.owner, &self.repo)
                    .list()
                    .state(octocrab::params::State::All)
                    .sort(octocrab::params::pulls::Sort::Created)
                    .direction(octocrab::params::Direction::Descending)
                    .per_page(PER_PAGE)
                    .page(page)
                    .send()
                    .await?;
                Ok::<_, GitHubError>(page.items)
            },
            |pr: &PullRequest| {
                let referenced = pr
                    .body
                    .as_deref()
                    .is_some_and(|body| pr_references_issue(body, issue_number));
                let live = pr.merged_at.is_some()
                    || matches!(pr.state, Some(octocrab::models::IssueState::Open));
                referenced && live
            },
        )
        .await
    }
}
