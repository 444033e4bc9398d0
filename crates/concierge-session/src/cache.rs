//! Session cache with LRU eviction and TTL support.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::persistence::{NoPersistence, PersistenceHook};
use crate::ttl::TtlTracker;

/// Entry stored in the cache.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Cached value, shared with readers.
    pub value: Arc<V>,

    /// When this entry was put into the cache.
    pub cached_at: Instant,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            cached_at: self.cached_at,
        }
    }
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }
}

struct CacheInner<P: PersistenceHook> {
    lru: LruCache<String, CacheEntry<P::Value>>,
    ttl: TtlTracker,
    persistence: P,
}

impl<P: PersistenceHook> CacheInner<P> {
    /// Drop the entry if its deadline has passed. Returns true if it was dropped.
    fn evict_if_expired(&mut self, session_id: &str) -> bool {
        if !self.ttl.is_expired(session_id) {
            return false;
        }
        self.ttl.remove(session_id);
        if self.lru.pop(session_id).is_some() {
            debug!(session_id = %session_id, "Cached session expired");
            self.persistence.on_evict(session_id);
        }
        true
    }

    fn store(&mut self, session_id: &str, value: Arc<V<P>>, ttl: Duration, capacity: usize) {
        if self.lru.len() >= capacity && !self.lru.contains(session_id) {
            if let Some((evicted_id, _)) = self.lru.pop_lru() {
                debug!(session_id = %evicted_id, "Evicting LRU session to make room");
                self.ttl.remove(&evicted_id);
                self.persistence.on_evict(&evicted_id);
            }
        }
        self.lru.put(session_id.to_string(), CacheEntry::new(value));
        self.ttl.arm_for(session_id, ttl);
    }
}

type V<P> = <P as PersistenceHook>::Value;

/// Session cache with LRU eviction and absolute TTL.
///
/// Values are replaced as a whole on every [`put`](Self::put); readers get
/// an `Arc` to an immutable snapshot. Expired entries are removed when they
/// are next touched.
pub struct SessionCache<P: PersistenceHook> {
    inner: Arc<RwLock<CacheInner<P>>>,
    config: CacheConfig,
}

impl<T: Send + Sync + 'static> SessionCache<NoPersistence<T>> {
    /// Create a new session cache with no rehydration backend.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_persistence(config, NoPersistence::default())
    }
}

impl<P: PersistenceHook> SessionCache<P> {
    /// Create a new session cache with a rehydration backend.
    pub fn with_persistence(config: CacheConfig, persistence: P) -> Self {
        let cap = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);

        let inner = CacheInner {
            lru: LruCache::new(cap),
            ttl: TtlTracker::new(config.ttl),
            persistence,
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
            config,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the current number of cached sessions (expired ones included
    /// until they are next accessed).
    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.lru.is_empty()
    }

    /// Get a cached value.
    ///
    /// Returns `None` when the session is absent or its deadline has passed;
    /// an expired entry is evicted at that moment. Marks the entry as
    /// recently used but does not extend its deadline.
    pub async fn get(&self, session_id: &str) -> Option<Arc<V<P>>> {
        let mut inner = self.inner.write().await;

        if inner.evict_if_expired(session_id) {
            return None;
        }

        let value = inner.lru.get(session_id).map(|e| Arc::clone(&e.value));
        if value.is_some() {
            trace!(session_id = %session_id, "Session cache hit");
        }
        value
    }

    /// Get a cached value or rehydrate it through the persistence hook.
    ///
    /// Callers must serialize access per session for the loaded value to
    /// be guaranteed current. The hook runs under the cache's shared read
    /// lock, so it must not call back into this cache.
    pub async fn get_or_load(&self, session_id: &str) -> Result<Arc<V<P>>> {
        if let Some(value) = self.get(session_id).await {
            return Ok(value);
        }

        debug!(session_id = %session_id, "Session cache miss, loading from persistence");

        let loaded = {
            let inner = self.inner.read().await;
            inner.persistence.load(session_id)?
        };

        match loaded {
            Some(value) => {
                let value = Arc::new(value);
                let mut inner = self.inner.write().await;
                inner.store(
                    session_id,
                    Arc::clone(&value),
                    self.config.ttl,
                    self.config.max_sessions,
                );
                debug!(
                    session_id = %session_id,
                    cache_size = inner.lru.len(),
                    "Session loaded from persistence"
                );
                Ok(value)
            }
            None => Err(Error::NotFound(session_id.to_string())),
        }
    }

    /// Replace the cached value for a session using the default TTL.
    pub async fn put(&self, session_id: &str, value: V<P>) -> Arc<V<P>> {
        self.put_with_ttl(session_id, value, self.config.ttl).await
    }

    /// Replace the cached value for a session with an explicit TTL.
    ///
    /// The previous value, if any, is swapped out in one step.
    pub async fn put_with_ttl(&self, session_id: &str, value: V<P>, ttl: Duration) -> Arc<V<P>> {
        let value = Arc::new(value);
        let mut inner = self.inner.write().await;
        inner.store(session_id, Arc::clone(&value), ttl, self.config.max_sessions);

        trace!(
            session_id = %session_id,
            ttl_ms = ttl.as_millis() as u64,
            cache_size = inner.lru.len(),
            "Session put into cache"
        );

        value
    }

    /// Check if a live entry exists (without updating LRU order).
    pub async fn contains(&self, session_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.lru.contains(session_id) && !inner.ttl.is_expired(session_id)
    }

    /// Peek at a live value without updating LRU order.
    pub async fn peek(&self, session_id: &str) -> Option<Arc<V<P>>> {
        let inner = self.inner.read().await;
        if inner.ttl.is_expired(session_id) {
            None
        } else {
            inner.lru.peek(session_id).map(|e| Arc::clone(&e.value))
        }
    }

    /// Remove a session from the cache only.
    pub async fn invalidate(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        inner.ttl.remove(session_id);
        if inner.lru.pop(session_id).is_some() {
            debug!(session_id = %session_id, "Session invalidated from cache");
            inner.persistence.on_evict(session_id);
        }
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.lru.clear();
        inner.ttl.clear();
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            size: inner.lru.len(),
            capacity: self.config.max_sessions,
            ttl: self.config.ttl,
        }
    }
}

impl<P: PersistenceHook> Clone for SessionCache<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of cached sessions.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,

    /// Default entry lifetime.
    pub ttl: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Turns = Vec<String>;

    fn cache(config: CacheConfig) -> SessionCache<NoPersistence<Turns>> {
        SessionCache::new(config)
    }

    /// Hook backed by a shared vector so tests can mutate "storage" directly.
    struct SharedStore {
        data: std::sync::Mutex<Turns>,
        loads: AtomicUsize,
    }

    impl PersistenceHook for Arc<SharedStore> {
        type Value = Turns;

        fn load(&self, session_id: &str) -> Result<Option<Turns>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if session_id == "missing" {
                return Ok(None);
            }
            Ok(Some(self.data.lock().unwrap().clone()))
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = cache(CacheConfig::new().with_max_sessions(10));

        cache
            .put("session-1", vec!["hi".into(), "hello".into()])
            .await;

        let value = cache.get("session-1").await.unwrap();
        assert_eq!(value.as_slice(), ["hi", "hello"]);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let cache = cache(CacheConfig::new());
        assert!(cache.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_whole_value() {
        let cache = cache(CacheConfig::new());

        cache.put("session-1", vec!["a".into()]).await;
        let before = cache.get("session-1").await.unwrap();

        cache.put("session-1", vec!["b".into(), "c".into()]).await;
        let after = cache.get("session-1").await.unwrap();

        // Earlier readers keep their snapshot
        assert_eq!(before.as_slice(), ["a"]);
        assert_eq!(after.as_slice(), ["b", "c"]);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = cache(CacheConfig::new().with_max_sessions(3));

        for i in 1..=3 {
            cache.put(&format!("session-{}", i), vec![]).await;
        }
        assert_eq!(cache.len().await, 3);

        // Touch session-1 so session-2 becomes least recently used
        cache.get("session-1").await;
        cache.put("session-4", vec![]).await;

        assert_eq!(cache.len().await, 3);
        assert!(cache.contains("session-1").await);
        assert!(!cache.contains("session-2").await);
        assert!(cache.contains("session-3").await);
        assert!(cache.contains("session-4").await);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = cache(CacheConfig::new().with_ttl(Duration::from_millis(20)));

        cache.put("session-1", vec!["x".into()]).await;
        assert!(cache.get("session-1").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("session-1").await.is_none());
        // Lazily removed on access
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_reads_do_not_extend_deadline() {
        let cache = cache(CacheConfig::new().with_ttl(Duration::from_millis(60)));
        cache.put("session-1", vec![]).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.get("session-1").await;
        }

        assert!(cache.get("session-1").await.is_none());
    }

    #[tokio::test]
    async fn test_put_with_ttl_overrides_default() {
        let cache = cache(CacheConfig::new().with_ttl(Duration::from_millis(10)));
        cache
            .put_with_ttl("session-1", vec![], Duration::from_secs(60))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("session-1").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = cache(CacheConfig::new());
        cache.put("session-1", vec![]).await;

        cache.invalidate("session-1").await;

        assert!(!cache.contains("session-1").await);
        assert!(cache.get("session-1").await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_load_rehydrates_after_expiry() {
        let store = Arc::new(SharedStore {
            data: std::sync::Mutex::new(vec!["v1".into()]),
            loads: AtomicUsize::new(0),
        });
        let cache = SessionCache::with_persistence(
            CacheConfig::new().with_ttl(Duration::from_millis(20)),
            Arc::clone(&store),
        );

        let first = cache.get_or_load("session-1").await.unwrap();
        assert_eq!(first.as_slice(), ["v1"]);
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        // Served from cache
        cache.get_or_load("session-1").await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        store.data.lock().unwrap().push("v2".into());

        let refreshed = cache.get_or_load("session-1").await.unwrap();
        assert_eq!(refreshed.as_slice(), ["v1", "v2"]);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_load_not_found() {
        let store = Arc::new(SharedStore {
            data: std::sync::Mutex::new(vec![]),
            loads: AtomicUsize::new(0),
        });
        let cache = SessionCache::with_persistence(CacheConfig::new(), store);

        let result = cache.get_or_load("missing").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let cache = cache(CacheConfig::new().with_max_sessions(7));
        cache.put("a", vec![]).await;
        cache.put("b", vec![]).await;

        let stats = cache.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.capacity, 7);
        assert_eq!(stats.ttl, Duration::from_secs(3600));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let cache = cache(CacheConfig::new());
        let other = cache.clone();

        cache.put("session-1", vec!["shared".into()]).await;

        assert!(other.peek("session-1").await.is_some());
    }
}
