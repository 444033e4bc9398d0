//! Rehydration hooks for cache misses.
//!
//! The cache never writes through to storage; durable state is owned by the
//! caller. A [`PersistenceHook`] only knows how to rebuild a value for a
//! session id when the cache has nothing usable.

use std::marker::PhantomData;

use crate::error::Result;

/// Source of truth consulted on a cache miss.
///
/// The associated `Value` type is what the cache stores, e.g. the most
/// recent turns of a conversation.
pub trait PersistenceHook: Send + Sync {
    /// The value type stored in the cache.
    type Value: Send + Sync + 'static;

    /// Load the value for a session from storage.
    ///
    /// Return `Ok(None)` if the session doesn't exist in storage.
    fn load(&self, session_id: &str) -> Result<Option<Self::Value>>;

    /// Called when an entry leaves the cache due to LRU, TTL, or invalidation.
    fn on_evict(&self, _session_id: &str) {}
}

/// A hook that never finds anything, for purely in-memory caching.
pub struct NoPersistence<V>(PhantomData<fn() -> V>);

impl<V> Default for NoPersistence<V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<V> std::fmt::Debug for NoPersistence<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NoPersistence")
    }
}

impl<V: Send + Sync + 'static> PersistenceHook for NoPersistence<V> {
    type Value = V;

    fn load(&self, _session_id: &str) -> Result<Option<V>> {
        Ok(None)
    }
}
