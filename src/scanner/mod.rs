//! Evidence scanners produce the repository listing the classifier consumes.

pub mod directory;
pub mod git_index;

use async_trait::async_trait;
use thiserror::Error;

use crate::classifier::RepositoryListing;

pub use directory::DirectoryScanner;
pub use git_index::GitIndexScanner;

/// Directories never descended into
pub const SKIPPED_DIRECTORIES: &[&str] = &["node_modules", "venv", "__pycache__", "target"];

/// Maximum snippet size captured for provider declaration candidates
pub const SNIPPET_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error while scanning {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source of repository listings
#[async_trait]
pub trait EvidenceScanner: Send + Sync {
    async fn scan(&self) -> Result<RepositoryListing, ScanError>;
}

/// Whether a directory name should be skipped while walking a tree
pub fn is_skipped_directory(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRECTORIES.contains(&name)
}

/// Whether a file's leading content is worth capturing for provider detection
pub fn wants_snippet(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".tf")
        && (lower.contains("provider") || lower == "versions.tf" || lower == "main.tf")
}

/// Truncate raw file content to a snippet, respecting UTF-8 boundaries
pub fn snippet_from_bytes(bytes: &[u8]) -> String {
    let limit = bytes.len().min(SNIPPET_BYTES);
    let text = String::from_utf8_lossy(&bytes[..limit]);
    text.trim_end_matches('\u{FFFD}').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_directories() {
        assert!(is_skipped_directory(".git"));
        assert!(is_skipped_directory(".terraform"));
        assert!(is_skipped_directory("node_modules"));
        assert!(is_skipped_directory("__pycache__"));
        assert!(!is_skipped_directory("infra"));
    }

    #[test]
    fn test_snippet_candidates() {
        assert!(wants_snippet("providers.tf"));
        assert!(wants_snippet("versions.tf"));
        assert!(wants_snippet("main.tf"));
        assert!(!wants_snippet("variables.tf"));
        assert!(!wants_snippet("main.bicep"));
    }

    #[test]
    fn test_snippet_is_bounded() {
        let content = vec![b'a'; SNIPPET_BYTES * 2];
        assert_eq!(snippet_from_bytes(&content).len(), SNIPPET_BYTES);
    }
}
