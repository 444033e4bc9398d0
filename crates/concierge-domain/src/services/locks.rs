//! Per-session mutation locks.
//!
//! At most one turn or delete runs per session at a time; different
//! sessions never contend. The registry holds weak references, so a
//! session's lock is freed once no task holds or awaits it.
//!
//! Keys are plain strings, so the knowledge service uses the same registry
//! keyed by entry id.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Dead entries are pruned once the registry grows past this size.
const PRUNE_THRESHOLD: usize = 256;

/// Held for the duration of one session mutation.
pub type SessionGuard = OwnedMutexGuard<()>;

/// Registry of per-session async mutexes.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = self.lock_for(session_id);
        trace!(session_id = %session_id, "Waiting for session lock");
        lock.lock_owned().await
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        self.lock_for(session_id).try_lock_owned().ok()
    }

    /// Number of sessions with a live lock.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();

        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(session_id.to_string(), Arc::downgrade(&lock));
        lock
    }
}

impl std::fmt::Debug for SessionLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLocks")
            .field("active", &self.active())
            .finish()
    }
}
