use async_trait::async_trait;
use git2::Repository;
use std::path::PathBuf;
use tracing::debug;

use super::{is_skipped_directory, snippet_from_bytes, wants_snippet, EvidenceScanner, ScanError};
use crate::classifier::{ListingEntry, RepositoryListing};

/// Lists the paths tracked in a repository's index, ignoring untracked files
#[derive(Debug, Clone)]
pub struct GitIndexScanner {
    repo_path: PathBuf,
}

impl GitIndexScanner {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn scan_blocking(repo_path: PathBuf) -> Result<RepositoryListing, ScanError> {
        let repo = Repository::open(&repo_path)?;
        let index = repo.index()?;

        let mut entries = Vec::new();
        for entry in index.iter() {
            let path = String::from_utf8_lossy(&entry.path).to_string();
            let mut segments: Vec<&str> = path.split('/').collect();
            let file_name = segments.pop().unwrap_or_default().to_string();
            if segments.iter().any(|dir| is_skipped_directory(dir)) {
                continue;
            }

            let snippet = if wants_snippet(&file_name) {
                repo.find_blob(entry.id)
                    .ok()
                    .map(|blob| snippet_from_bytes(blob.content()))
            } else {
                None
            };
            entries.push(ListingEntry { path, snippet });
        }

        debug!(repo = %repo_path.display(), files = entries.len(), "Git index scan complete");
        Ok(RepositoryListing::new(entries))
    }
}

#[async_trait]
impl EvidenceScanner for GitIndexScanner {
    async fn scan(&self) -> Result<RepositoryListing, ScanError> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || Self::scan_blocking(repo_path)).await?
    }
}
