use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::ClassifierSettings;
use crate::delegation::poller::{PollPolicy, TimeoutPolicy};
use crate::workflows::{AmbiguityPolicy, GraphSettings, RetryPolicy};

const CONFIG_FILE: &str = "iac-conductor.toml";
const RC_FILE: &str = ".iac-conductor-rc";

/// Main configuration structure for iac-conductor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConductorConfig {
    /// GitHub configuration for the issue-based coding agent
    pub github: GitHubConfig,
    pub classifier: ClassifierConfig,
    pub delegation: DelegationConfig,
    pub approval: ApprovalConfig,
    /// Default node retry policy
    pub retry: RetryConfig,
    pub persistence: PersistenceConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    /// GitHub API token (can be set via env var)
    pub token: Option<String>,
    /// Owner of the repository that receives delegation issues
    pub owner: String,
    /// Name of the repository that receives delegation issues
    pub repo: String,
    /// Assignee that marks an issue as handed to the coding agent
    pub agent_assignee: Option<String>,
    /// Label put on every delegation issue
    pub delegation_label: String,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per hour limit
    pub requests_per_hour: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Minimum confidence for a decided dialect
    pub threshold: f64,
    /// Minimum lead over the runner-up
    pub margin: f64,
    /// Smoothing added to the total score
    pub epsilon: f64,
    /// Listings remembered by the classification cache
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegationConfig {
    pub poll_interval_seconds: u64,
    pub timeout_seconds: u64,
    /// Consecutive transient poll errors before a delegation fails
    pub error_ceiling: u32,
    pub timeout_policy: TimeoutPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApprovalConfig {
    /// Suspend for human review once the coding agent has produced a change
    pub require_review: bool,
    pub ambiguity_policy: AmbiguityPolicy,
    /// Pending gates expire after this many seconds
    pub expiry_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Directory holding one checkpoint file per run
    pub checkpoint_directory: PathBuf,
    /// Verify the integrity hash when loading checkpoints
    pub enable_integrity_checks: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG
    pub log_level: String,
    /// Emit JSON log lines
    pub json_logs: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            github: GitHubConfig {
                token: None, // Will be read from env var or .iac-conductor-rc
                owner: String::new(),
                repo: String::new(),
                agent_assignee: None,
                delegation_label: "iac-delegation".to_string(),
                rate_limit: RateLimitConfig {
                    requests_per_hour: 5000,
                    burst_capacity: 100,
                },
            },
            classifier: ClassifierConfig {
                threshold: 0.6,
                margin: 0.2,
                epsilon: 0.25,
                cache_capacity: 1024,
            },
            delegation: DelegationConfig {
                poll_interval_seconds: 30,
                timeout_seconds: 3600, // 1 hour
                error_ceiling: 3,
                timeout_policy: TimeoutPolicy::Fail,
            },
            approval: ApprovalConfig {
                require_review: false,
                ambiguity_policy: AmbiguityPolicy::Suspend,
                expiry_seconds: None,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                jitter: true,
            },
            persistence: PersistenceConfig {
                checkpoint_directory: PathBuf::from(".iac-conductor/runs"),
                enable_integrity_checks: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
        }
    }
}

impl ConductorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (iac-conductor.toml, .iac-conductor-rc)
    /// 3. Environment variables (prefixed with IAC_CONDUCTOR_, nested with __)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ConductorConfig::load`], reading files from `directory`
    pub fn load_from(directory: &Path) -> Result<Self> {
        let defaults = Config::try_from(&ConductorConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        for name in [CONFIG_FILE, RC_FILE] {
            let path = directory.join(name);
            if path.exists() {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("IAC_CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut conductor_config: ConductorConfig = builder.build()?.try_deserialize()?;

        // Special handling for GitHub token
        if conductor_config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                conductor_config.github.token = Some(token);
            }
        }

        Ok(conductor_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            threshold: self.classifier.threshold,
            margin: self.classifier.margin,
            epsilon: self.classifier.epsilon,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.delegation.poll_interval_seconds),
            timeout: Duration::from_secs(self.delegation.timeout_seconds),
            error_ceiling: self.delegation.error_ceiling.max(1),
            on_timeout: self.delegation.timeout_policy,
        }
    }

    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            ambiguity: self.approval.ambiguity_policy,
            require_review: self.approval.require_review,
            retry: self.retry_policy(),
        }
    }

    pub fn approval_expiry(&self) -> Option<Duration> {
        self.approval.expiry_seconds.map(Duration::from_secs)
    }
}
