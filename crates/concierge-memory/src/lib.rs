//! Durable storage for Concierge.
//!
//! - [`SqliteStore`]: SQLite-backed implementation of the session log
//!   ([`SessionStore`]), the session directory ([`SessionIndex`]), the
//!   knowledge catalog ([`KnowledgeStore`]) and summaries ([`SummaryStore`]).
//! - [`VectorIndex`]: similarity-search projection of the knowledge catalog,
//!   with an in-process implementation ([`InMemoryVectorIndex`]) and a
//!   sqlite-vec one ([`SqliteVectorIndex`]).
//!
//! Every multi-row write runs inside a single transaction, so a failed
//! append or delete leaves the previous state untouched.

pub mod backend;
pub mod error;
pub mod store;
pub mod types;
pub mod validation;
pub mod vector;

pub use backend::{KnowledgeStore, SessionIndex, SessionStore, SummaryStore};
pub use error::{MemoryError, Result};
pub use store::{SqliteStore, StoreStats};
pub use types::{
    ConversationSummary, ConversationTurn, EntryId, KnowledgeDraft, KnowledgeEntry, Metadata,
    Role, SessionRecord, TurnId, VectorEntry, VectorMatch, now,
};
pub use validation::{ValidationError, validate_session_id};
pub use vector::{InMemoryVectorIndex, SharedVectorIndex, SqliteVectorIndex, VectorIndex};
