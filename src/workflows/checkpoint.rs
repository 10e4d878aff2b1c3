//! Durable run checkpoints.
//!
//! The executor saves a [`WorkflowRun`] after every transition and every
//! pending re-check. A run is only considered advanced once its checkpoint
//! has been written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::run::{RunId, WorkflowRun};

const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_SUFFIX: &str = ".run.json";
const LOCK_FILE: &str = ".engine.lock";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint for run {run_id} is corrupt: {reason}")]
    StateCorruption { run_id: String, reason: String },

    #[error("Invalid run id for a checkpoint file: {0}")]
    InvalidRunId(String),

    #[error("Checkpoint directory is locked by another engine: {0}")]
    LockError(String),

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Durable store of workflow runs
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, run: &WorkflowRun) -> Result<(), PersistenceError>;

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError>;

    /// All stored runs, oldest first
    async fn list(&self) -> Result<Vec<WorkflowRun>, PersistenceError>;
}

/// In-process store; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    runs: Arc<Mutex<HashMap<RunId, WorkflowRun>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        self.runs.lock().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError> {
        Ok(self.runs.lock().await.get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let mut runs: Vec<WorkflowRun> = self.runs.lock().await.values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub written_at: DateTime<Utc>,
    pub integrity_hash: String,
    pub process_id: u32,
    pub hostname: String,
}

/// On-disk layout; `run` keeps the exact JSON text the integrity hash covers
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    version: u32,
    metadata: CheckpointMetadata,
    run: Box<RawValue>,
}

/// One JSON file per run, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
    integrity_checks: bool,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            integrity_checks: true,
        }
    }

    pub fn with_integrity_checks(mut self, enabled: bool) -> Self {
        self.integrity_checks = enabled;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn run_file(&self, run_id: &RunId) -> Result<PathBuf, PersistenceError> {
        let id = run_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::InvalidRunId(id.to_string()));
        }
        Ok(self.directory.join(format!("{id}{CHECKPOINT_SUFFIX}")))
    }

    fn integrity_hash(run_json: &str) -> String {
        let mut hasher = DefaultHasher::new();
        run_json.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    async fn read_checkpoint(&self, path: &Path) -> Result<WorkflowRun, PersistenceError> {
        let content = tokio::fs::read_to_string(path).await?;
        let envelope: CheckpointEnvelope = serde_json::from_str(&content)?;
        let corrupt = |reason: String| PersistenceError::StateCorruption {
            run_id: path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(CHECKPOINT_SUFFIX))
                .unwrap_or_default()
                .to_string(),
            reason,
        };

        if envelope.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!("unsupported checkpoint version {}", envelope.version)));
        }

        let run_json = envelope.run.get();
        let tampered = Self::integrity_hash(run_json) != envelope.metadata.integrity_hash;
        if self.integrity_checks && tampered {
            return Err(corrupt("integrity hash mismatch".to_string()));
        }

        Ok(serde_json::from_str(run_json)?)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        let path = self.run_file(&run.id)?;
        tokio::fs::create_dir_all(&self.directory).await?;

        let run_json = serde_json::to_string(run)?;
        let envelope = CheckpointEnvelope {
            version: CHECKPOINT_VERSION,
            metadata: CheckpointMetadata {
                checkpoint_id: format!(
                    "{}_{}",
                    Utc::now().timestamp_millis(),
                    rand::random::<u32>()
                ),
                written_at: Utc::now(),
                integrity_hash: Self::integrity_hash(&run_json),
                process_id: std::process::id(),
                hostname: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            run: RawValue::from_string(run_json)?,
        };

        // Write to a sibling temp file, then rename over the old checkpoint
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, serde_json::to_vec_pretty(&envelope)?).await?;
        tokio::fs::rename(&temp, &path).await?;

        debug!(
            run.id = %run.id,
            status = %run.status,
            node = %run.current_node,
            checkpoint_id = %envelope.metadata.checkpoint_id,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError> {
        let path = self.run_file(run_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        self.read_checkpoint(&path).await.map(Some)
    }

    async fn list(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let mut runs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(CHECKPOINT_SUFFIX));
            if !is_checkpoint {
                continue;
            }
            match self.read_checkpoint(&path).await {
                Ok(run) => runs.push(run),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable checkpoint")
                }
            }
        }

        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}

/// Advisory lock keeping a second engine process off a checkpoint directory
pub struct DirectoryLock {
    lock: fd_lock::RwLock<File>,
}

impl DirectoryLock {
    pub fn open(directory: &Path) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(directory)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(directory.join(LOCK_FILE))?;
        Ok(Self {
            lock: fd_lock::RwLock::new(file),
        })
    }

    /// Take the lock without waiting; hold the guard for the engine's lifetime
    pub fn try_acquire(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, PersistenceError> {
        self.lock
            .try_write()
            .map_err(|err| PersistenceError::LockError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{InfraClassifier, RepositoryListing};
    use crate::workflows::run::{NodeId, RunInput, RunStatus};
    use tempfile::TempDir;

    fn sample_run(id: &str) -> WorkflowRun {
        WorkflowRun::new(
            RunId::from(id),
            NodeId::from("classify"),
            RunInput::new("acme/platform", RepositoryListing::from_paths(["main.tf"])),
            "corr-1".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_file_store_replaces_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut run = sample_run("run-1");
        store.save(&run).await.unwrap();
        run.status = RunStatus::Running;
        store.save(&run).await.unwrap();

        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(!dir.path().join("run-1.run.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_classified_run_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let listing =
            RepositoryListing::from_paths(["main.tf", "variables.tf", "terraform.tfstate"]);
        let mut run = sample_run("run-classified");
        run.state.classification = Some(InfraClassifier::default().classify(&listing).unwrap());
        run.current_node = NodeId::from("delegate");
        store.save(&run).await.unwrap();

        let loaded = store.load(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
        assert_eq!(store.list().await.unwrap(), vec![run]);
    }

    #[tokio::test]
    async fn test_missing_run_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("not-created"));
        assert!(store.load(&RunId::from("nope")).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_checkpoint_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let run = sample_run("run-1");
        store.save(&run).await.unwrap();

        let path = dir.path().join("run-1.run.json");
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("acme/platform", "acme/elsewhere")).unwrap();

        assert!(matches!(
            store.load(&run.id).await,
            Err(PersistenceError::StateCorruption { .. })
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_like_run_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.load(&RunId::from("../escape")).await,
            Err(PersistenceError::InvalidRunId(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_state() {
        let store = MemoryCheckpointStore::new();
        let other = store.clone();
        store.save(&sample_run("run-1")).await.unwrap();
        assert!(other.load(&RunId::from("run-1")).await.unwrap().is_some());
    }

    #[test]
    fn test_directory_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let mut first = DirectoryLock::open(dir.path()).unwrap();
        let mut second = DirectoryLock::open(dir.path()).unwrap();

        let guard = first.try_acquire().unwrap();
        assert!(matches!(second.try_acquire(), Err(PersistenceError::LockError(_))));
        drop(guard);
        assert!(second.try_acquire().is_ok());
    }
}
