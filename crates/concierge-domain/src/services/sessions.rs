//! Session service.
//!
//! The durable log is the source of truth. The [`TurnCache`] holds the most
//! recent turns of active sessions and is rebuilt from the log whenever it
//! misses or expires. Every committed append replaces the cached tail with a
//! fresh read, under the session lock, so the cache never runs ahead of the
//! log.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use concierge_memory::{
    ConversationSummary, ConversationTurn, SessionRecord, SessionStore, now, validate_session_id,
};
use concierge_session::{CacheConfig, CacheStats, PersistenceHook, SessionCache};
use tracing::{debug, info, warn};

use crate::error::{DomainError, Result};
use crate::services::Stores;
use crate::services::locks::{SessionGuard, SessionLocks};

// ─────────────────────────────────────────────────────────────────────────────
// Cache Rehydration
// ─────────────────────────────────────────────────────────────────────────────

/// Loads a session's most recent turns from the durable log.
pub struct TailLoader {
    store: Arc<dyn SessionStore>,
    tail_len: usize,
}

impl TailLoader {
    pub fn new(store: Arc<dyn SessionStore>, tail_len: usize) -> Self {
        Self { store, tail_len }
    }
}

impl PersistenceHook for TailLoader {
    type Value = Vec<ConversationTurn>;

    fn load(&self, session_id: &str) -> concierge_session::Result<Option<Vec<ConversationTurn>>> {
        self.store
            .read_turns(session_id, self.tail_len, 0)
            .map(Some)
            .map_err(|e| concierge_session::Error::Persistence(e.to_string()))
    }

    fn on_evict(&self, session_id: &str) {
        debug!(session_id = %session_id, "Turn tail evicted from cache");
    }
}

/// Cache of each session's most recent turns.
pub type TurnCache = SessionCache<TailLoader>;

// ─────────────────────────────────────────────────────────────────────────────
// Session Service
// ─────────────────────────────────────────────────────────────────────────────

/// Domain service for session history and the session directory.
#[derive(Clone)]
pub struct SessionService {
    stores: Stores,
    cache: TurnCache,
    locks: SessionLocks,
    tail_len: usize,
}

impl SessionService {
    /// Create a session service caching `tail_len` turns per session.
    pub fn new(stores: Stores, cache_config: CacheConfig, tail_len: usize) -> Self {
        let tail_len = tail_len.max(1);
        let cache = SessionCache::with_persistence(
            cache_config,
            TailLoader::new(Arc::clone(&stores.sessions), tail_len),
        );
        Self {
            stores,
            cache,
            locks: SessionLocks::new(),
            tail_len,
        }
    }

    /// The per-session lock registry shared with the chat service.
    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Lock a session for mutation.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        self.locks.acquire(session_id).await
    }

    /// The last `window` turns, chronologically, served from the cache when
    /// the window fits in the cached tail.
    ///
    /// Waits for any turn in flight on the session, so a rehydrated tail is
    /// never older than the store.
    pub async fn recent(&self, session_id: &str, window: usize) -> Result<Vec<ConversationTurn>> {
        validate_session_id(session_id)?;
        let _guard = self.lock(session_id).await;
        self.recent_locked(session_id, window).await
    }

    /// [`Self::recent`] for callers already holding the session lock.
    pub(crate) async fn recent_locked(
        &self,
        session_id: &str,
        window: usize,
    ) -> Result<Vec<ConversationTurn>> {
        validate_session_id(session_id)?;
        if window == 0 {
            return Ok(Vec::new());
        }
        if window > self.tail_len {
            return Ok(self.stores.sessions.read_turns(session_id, window, 0)?);
        }

        let tail = self.cache.get_or_load(session_id).await?;
        let start = tail.len().saturating_sub(window);
        Ok(tail[start..].to_vec())
    }

    /// Durably append a turn and refresh the cached tail.
    ///
    /// Callers hold the session lock.
    pub(crate) async fn append(&self, turn: ConversationTurn) -> Result<SessionRecord> {
        let record = self.stores.sessions.append_turn(&turn)?;
        debug!(
            session_id = %record.session_id,
            role = %turn.role,
            turn_count = record.turn_count,
            "Turn persisted"
        );

        match self
            .stores
            .sessions
            .read_turns(&record.session_id, self.tail_len, 0)
        {
            Ok(tail) => {
                self.cache.put(&record.session_id, tail).await;
            }
            Err(e) => {
                warn!(session_id = %record.session_id, error = %e, "Cache refresh failed, invalidating");
                self.cache.invalidate(&record.session_id).await;
            }
        }
        Ok(record)
    }

    /// Page through a session's turns straight from the log.
    ///
    /// `offset` skips the most recent turns; the page is chronological.
    pub fn history(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationTurn>> {
        validate_session_id(session_id)?;
        Ok(self.stores.sessions.read_turns(session_id, limit, offset)?)
    }

    /// Look up one session.
    pub fn get(&self, session_id: &str) -> Result<SessionRecord> {
        validate_session_id(session_id)?;
        self.stores
            .index
            .get_session(session_id)?
            .ok_or_else(|| DomainError::NotFound(format!("session {}", session_id)))
    }

    /// List sessions, most recently active first.
    pub fn list(
        &self,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>> {
        Ok(self.stores.index.list_sessions(owner_id, limit, offset)?)
    }

    /// Delete a session's turns, summaries, and directory record.
    ///
    /// Waits for any in-flight turn on the session. Returns `false` if the
    /// session did not exist.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        let _guard = self.lock(session_id).await;

        let existed = self.stores.sessions.delete_session(session_id)?;
        self.cache.invalidate(session_id).await;
        if existed {
            info!(session_id = %session_id, "Session deleted");
        }
        Ok(existed)
    }

    /// Delete every session idle for more than `days` days.
    ///
    /// Returns the ids that were removed.
    pub async fn purge_inactive(&self, days: u32) -> Result<Vec<String>> {
        let cutoff = now() - ChronoDuration::days(i64::from(days));
        let stale = self.stores.index.inactive_sessions(cutoff)?;

        let mut removed = Vec::with_capacity(stale.len());
        for session_id in stale {
            if self.delete(&session_id).await? {
                removed.push(session_id);
            }
        }
        info!(days, removed = removed.len(), "Purged inactive sessions");
        Ok(removed)
    }

    /// Most recent summary for a session.
    pub fn latest_summary(&self, session_id: &str) -> Result<Option<ConversationSummary>> {
        validate_session_id(session_id)?;
        Ok(self.stores.summaries.latest_summary(session_id)?)
    }

    /// Record that a summary covering `through` turns has been scheduled.
    pub(crate) fn mark_summarized(&self, session_id: &str, through: usize) -> Result<()> {
        Ok(self.stores.index.mark_summarized(session_id, through)?)
    }

    /// Cache occupancy.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_memory::SqliteStore;
    use std::time::Duration;

    fn service(ttl: Duration) -> (SessionService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = SessionService::new(
            Stores::sqlite(Arc::clone(&store)),
            CacheConfig::default().with_ttl(ttl),
            50,
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_append_refreshes_cache() {
        let (service, _) = service(Duration::from_secs(60));
        let record = service
            .append(ConversationTurn::user("s1", "hello"))
            .await
            .unwrap();
        assert_eq!(record.turn_count, 1);

        let recent = service.recent("s1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(service.cache_stats().await.size, 1);
    }

    #[tokio::test]
    async fn test_recent_rehydrates_unknown_session_as_empty() {
        let (service, _) = service(Duration::from_secs(60));
        assert!(service.recent("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_wider_than_tail_reads_store() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = SessionService::new(Stores::sqlite(store), CacheConfig::default(), 2);
        for i in 0..5 {
            service
                .append(ConversationTurn::user("s1", format!("m{}", i)))
                .await
                .unwrap();
        }
        let recent = service.recent("s1", 4).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recent_waits_for_session_lock() {
        let (service, _) = service(Duration::from_secs(60));
        service
            .append(ConversationTurn::user("s1", "first"))
            .await
            .unwrap();

        let guard = service.lock("s1").await;
        let reader = {
            let service = service.clone();
            tokio::spawn(async move { service.recent("s1", 10).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        service
            .append(ConversationTurn::assistant("s1", "second"))
            .await
            .unwrap();
        drop(guard);

        let recent = reader.await.unwrap().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].content, "second");
    }

    #[tokio::test]
    async fn test_invalid_session_id_rejected() {
        let (service, _) = service(Duration::from_secs(60));
        let err = service.recent("bad id!", 10).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(matches!(service.get(""), Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_clears_store_index_and_cache() {
        let (service, store) = service(Duration::from_secs(60));
        service
            .append(ConversationTurn::user("s1", "hello"))
            .await
            .unwrap();

        assert!(service.delete("s1").await.unwrap());
        assert!(matches!(service.get("s1"), Err(DomainError::NotFound(_))));
        assert_eq!(store.count_turns("s1").unwrap(), 0);
        assert!(service.recent("s1", 10).await.unwrap().is_empty());
        assert!(!service.delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_inactive() {
        let (service, store) = service(Duration::from_secs(60));
        service
            .append(ConversationTurn::user("old", "hi"))
            .await
            .unwrap();
        service
            .append(ConversationTurn::user("fresh", "hi"))
            .await
            .unwrap();

        let stale = concierge_memory::now() - ChronoDuration::days(45);
        store
            .with_transaction(|conn| {
                conn.execute(
                    "UPDATE sessions SET updated_at = ?1 WHERE id = 'old'",
                    [stale.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)],
                )?;
                Ok(())
            })
            .unwrap();

        let removed = service.purge_inactive(30).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(service.get("fresh").is_ok());
    }
}
