//! Keyed async locks serialising mutating repository operations.
//!
//! Integration runs lock on `remote URL + branch`; conflict operations lock
//! on the canonical repository path. A holder keeps its guard from clone or
//! open until push or commit, and the lock is released when the guard drops.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Guard returned by [`RepoLocks::acquire`].
pub type RepoLockGuard = OwnedMutexGuard<()>;

/// A map of per-key async mutexes. Cheap to clone.
#[derive(Clone, Default)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for an integration run.
    pub fn integration_key(remote_url: &str, branch: &str) -> String {
        format!("{remote_url}#{branch}")
    }

    /// Key for conflict operations on a local repository.
    pub fn repository_key(path: &Path) -> String {
        std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("repo lock map was poisoned, recovering");
            poisoned.into_inner()
        });
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> RepoLockGuard {
        debug!(key, "acquiring repo lock");
        let guard = self.slot(key).lock_owned().await;
        debug!(key, "repo lock acquired");
        guard
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<RepoLockGuard> {
        self.slot(key).try_lock_owned().ok()
    }
}
