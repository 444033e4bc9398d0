//! Volatile session cache with LRU eviction and absolute TTL expiry.
//!
//! The cache mirrors a bounded tail of each session's durable history.
//! It is never authoritative: a miss (absent or expired) tells the caller
//! to rehydrate from durable storage, optionally through a
//! [`PersistenceHook`].
//!
//! - Entries are stored behind `Arc` and replaced as a whole; readers never
//!   observe a partially merged value.
//! - Expiry is checked lazily on access. There is no background sweeper.
//! - Reads do not extend an entry's deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use concierge_session::{CacheConfig, SessionCache};
//!
//! let cache = SessionCache::<NoPersistence<Vec<String>>>::new(
//!     CacheConfig::default().with_ttl(Duration::from_secs(3600)),
//! );
//! cache.put("session-1", vec!["hello".into()]).await;
//! ```

mod cache;
mod config;
mod error;
mod persistence;
mod ttl;

pub use cache::{CacheEntry, CacheStats, SessionCache};
pub use config::{CacheConfig, DEFAULT_MAX_SESSIONS, DEFAULT_TTL};
pub use error::{Error, Result};
pub use persistence::{NoPersistence, PersistenceHook};
pub use ttl::TtlTracker;
