use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{is_skipped_directory, snippet_from_bytes, wants_snippet, EvidenceScanner, ScanError};
use crate::classifier::{ListingEntry, RepositoryListing};

/// Walks a working tree on disk
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn io_error(path: &Path, source: std::io::Error) -> ScanError {
        ScanError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl EvidenceScanner for DirectoryScanner {
    async fn scan(&self) -> Result<RepositoryListing, ScanError> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = fs::read_dir(&dir)
                .await
                .map_err(|e| Self::io_error(&dir, e))?;

            while let Some(item) = read_dir
                .next_entry()
                .await
                .map_err(|e| Self::io_error(&dir, e))?
            {
                let path = item.path();
                let name = item.file_name().to_string_lossy().to_string();
                let file_type = item
                    .file_type()
                    .await
                    .map_err(|e| Self::io_error(&path, e))?;

                if file_type.is_dir() {
                    if !is_skipped_directory(&name) {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Some(relative) = self.relative_path(&path) else {
                    continue;
                };
                let snippet = if wants_snippet(&name) {
                    let bytes = fs::read(&path).await.map_err(|e| Self::io_error(&path, e))?;
                    Some(snippet_from_bytes(&bytes))
                } else {
                    None
                };
                entries.push(ListingEntry { path: relative, snippet });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %self.root.display(), files = entries.len(), "Directory scan complete");
        Ok(RepositoryListing::new(entries))
    }
}
