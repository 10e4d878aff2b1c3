use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use octocrab::Octocrab;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::errors::GitHubError;
use super::issues::IssueHandler;
use super::pulls::PullRequestHandler;
use crate::config::GitHubConfig;

/// Rate-limited GitHub client scoped to one repository
#[derive(Debug, Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let token = config
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GitHubError::TokenNotFound(
                    "GitHub token not found. Set GITHUB_TOKEN or [github] token.".to_string(),
                )
            })?;

        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(GitHubError::ConfigNotFound(
                "GitHub owner and repository must both be configured".to_string(),
            ));
        }

        let octocrab = Octocrab::builder().personal_token(token.to_string()).build()?;

        Ok(Self::with_octocrab(
            octocrab,
            config.owner.clone(),
            config.repo.clone(),
            config.rate_limit.requests_per_hour,
            config.rate_limit.burst_capacity,
        ))
    }

    pub fn with_octocrab(
        octocrab: Octocrab,
        owner: String,
        repo: String,
        requests_per_hour: u32,
        burst_capacity: u32,
    ) -> Self {
        let per_hour = NonZeroU32::new(requests_per_hour).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_capacity).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_hour(per_hour).allow_burst(burst);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Self {
            octocrab,
            owner,
            repo,
            rate_limiter,
        }
    }

    /// `owner/repo`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn issues(&self) -> IssueHandler {
        IssueHandler::new(
            self.octocrab.clone(),
            self.owner.clone(),
            self.repo.clone(),
            self.rate_limiter.clone(),
        )
    }

    pub fn pulls(&self) -> PullRequestHandler {
        PullRequestHandler::new(
            self.octocrab.clone(),
            self.owner.clone(),
            self.repo.clone(),
            self.rate_limiter.clone(),
        )
    }
}
