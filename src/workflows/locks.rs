use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Per-repository mutation locks shared by all runs of one engine
#[derive(Debug, Clone, Default)]
pub struct RepositoryLocks {
    locks: Arc<SyncMutex<LockTable>>,
}

type LockTable = HashMap<String, Arc<Mutex<()>>>;

/// Held while a repository-mutating node runs; released on drop
#[derive(Debug)]
pub struct RepositoryGuard {
    repository: String,
    locks: Arc<SyncMutex<LockTable>>,
    held: OwnedMutexGuard<()>,
}

impl RepositoryGuard {
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl Drop for RepositoryGuard {
    fn drop(&mut self) {
        let mut locks = lock_table(&self.locks);
        // Only the table and this guard still reference the lock: nobody is waiting
        let held = OwnedMutexGuard::mutex(&self.held);
        let idle = locks
            .get(&self.repository)
            .is_some_and(|lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.repository);
        }
        debug!(repository = %self.repository, "Repository lock released");
    }
}

fn lock_table(locks: &SyncMutex<LockTable>) -> MutexGuard<'_, LockTable> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, repository: &str) -> RepositoryGuard {
        let lock = lock_table(&self.locks)
            .entry(repository.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        debug!(repository = %repository, "Repository lock acquired");
        RepositoryGuard {
            repository: repository.to_string(),
            locks: Arc::clone(&self.locks),
            held: guard,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock_table(&self.locks).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_same_repository_waits_for_release() {
        let locks = RepositoryLocks::new();
        let first = locks.acquire("acme/platform").await;

        let mut second = task::spawn(locks.acquire("acme/platform"));
        assert_pending!(second.poll());

        drop(first);
        assert!(second.is_woken());
        let guard = assert_ready!(second.poll());
        assert_eq!(guard.repository(), "acme/platform");
    }

    #[tokio::test]
    async fn test_different_repositories_do_not_contend() {
        let locks = RepositoryLocks::new();
        let _first = locks.acquire("acme/platform").await;

        let mut other = task::spawn(locks.acquire("acme/billing"));
        assert_ready!(other.poll());
    }

    #[tokio::test]
    async fn test_released_repositories_are_forgotten() {
        let locks = RepositoryLocks::new();
        let platform = locks.acquire("acme/platform").await;
        let billing = locks.acquire("acme/billing").await;
        assert_eq!(locks.tracked(), 2);

        drop(platform);
        drop(billing);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_lock_is_kept_while_a_waiter_remains() {
        let locks = RepositoryLocks::new();
        let first = locks.acquire("acme/platform").await;
        let mut second = task::spawn(locks.acquire("acme/platform"));
        assert_pending!(second.poll());

        drop(first);
        assert_eq!(locks.tracked(), 1);
        let guard = assert_ready!(second.poll());

        drop(guard);
        assert_eq!(locks.tracked(), 0);
    }
}
