use octocrab::Error as OctocrabError;

#[derive(Debug)]
pub enum GitHubError {
    TokenNotFound(String),
    ConfigNotFound(String),
    ApiError(OctocrabError),
    InvalidReference(String),
}

impl From<OctocrabError> for GitHubError {
    fn from(err: OctocrabError) -> Self {
        GitHubError::ApiError(err)
    }
}

impl GitHubError {
    /// Whether the failure is worth retrying: rate limits, server errors and
    /// network trouble are; authentication and validation problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::ApiError(octocrab::Error::GitHub { source, .. }) => {
                let status = source.status_code.as_u16();
                if status == 429 || status >= 500 {
                    return true;
                }
                status == 403 && source.message.to_lowercase().contains("rate limit")
            }
            GitHubError::ApiError(octocrab::Error::Http { .. }) => true,
            GitHubError::ApiError(other) => {
                let error_string = format!("{other:?}").to_lowercase();
                error_string.contains("timeout") || error_string.contains("connection")
            }
            GitHubError::TokenNotFound(_)
            | GitHubError::ConfigNotFound(_)
            | GitHubError::InvalidReference(_) => false,
        }
    }
}

impl std::fmt::Display for GitHubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitHubError::TokenNotFound(msg) => {
                writeln!(f, "GitHub Authentication Error")?;
                writeln!(f, "──────────────────────────")?;
                write!(f, "🔑 {msg}\n\n")?;
                writeln!(f, "🔧 QUICK FIXES:")?;
                writeln!(f, "   → Use GitHub CLI: export GITHUB_TOKEN=\"$(gh auth token)\"")?;
                writeln!(
                    f,
                    "   → Set token directly: export IAC_CONDUCTOR_GITHUB__TOKEN=your_token"
                )?;
                write!(f, "   → Create token at: https://github.com/settings/tokens")
            }
            GitHubError::ConfigNotFound(msg) => {
                writeln!(f, "GitHub Configuration Error")?;
                writeln!(f, "─────────────────────────")?;
                write!(f, "📂 {msg}\n\n")?;
                writeln!(f, "🔧 QUICK FIXES:")?;
                writeln!(f, "   → Set [github] owner and repo in iac-conductor.toml")?;
                write!(
                    f,
                    "   → Or export IAC_CONDUCTOR_GITHUB__OWNER=org IAC_CONDUCTOR_GITHUB__REPO=repo"
                )
            }
            GitHubError::ApiError(octocrab_err) => {
                writeln!(f, "GitHub API Error")?;
                writeln!(f, "────────────────")?;

                match octocrab_err {
                    octocrab::Error::GitHub { source, .. } => {
                        writeln!(f, "🌐 HTTP {}: {}", source.status_code, source.message)?;
                        writeln!(f)?;

                        match source.status_code.as_u16() {
                            401 => {
                                writeln!(f, "🔧 AUTHENTICATION FAILED:")?;
                                writeln!(f, "   → Token is invalid or expired")?;
                                write!(f, "   → Run: gh auth login")
                            }
                            403 => {
                                writeln!(f, "🔧 PERMISSION DENIED:")?;
                                writeln!(f, "   → Token lacks required permissions")?;
                                write!(f, "   → Check rate limits: gh api rate_limit")
                            }
                            404 => {
                                writeln!(f, "🔧 RESOURCE NOT FOUND:")?;
                                writeln!(f, "   → Repository may not exist or be private")?;
                                write!(f, "   → Check the [github] owner and repo settings")
                            }
                            _ => {
                                writeln!(f, "🔧 TROUBLESHOOTING:")?;
                                writeln!(f, "   → Check authentication: gh auth status")?;
                                write!(
                                    f,
                                    "   → Verify GitHub API status: https://status.github.com"
                                )
                            }
                        }
                    }
                    _ => {
                        write!(f, "🌐 {octocrab_err}\n\n")?;
                        writeln!(f, "🔧 TROUBLESHOOTING:")?;
                        writeln!(f, "   → Test connection: curl -I https://api.github.com")?;
                        write!(f, "   → Check rate limits: gh api rate_limit")
                    }
                }
            }
            GitHubError::InvalidReference(reference) => {
                write!(f, "Invalid GitHub reference '{reference}': expected an issue number")
            }
        }
    }
}

impl std::error::Error for GitHubError {}
