//! Storage traits for pluggable backends.
//!
//! The domain layer depends only on these traits, so SQLite can be swapped
//! for another store (or a fault-injecting wrapper in tests).
//!
//! ```ignore
//! use concierge_memory::{SessionStore, SqliteStore, ConversationTurn};
//!
//! let store = SqliteStore::open("~/.concierge/concierge.db")?;
//! let record = store.append_turn(&ConversationTurn::user("s1", "hello"))?;
//! assert_eq!(record.turn_count, 1);
//! ```

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ConversationSummary, ConversationTurn, EntryId, KnowledgeDraft, KnowledgeEntry,
    SessionRecord,
};

/// Append-only log of conversation turns, keyed by session.
///
/// All implementations must be `Send + Sync` to allow sharing across tasks.
pub trait SessionStore: Send + Sync {
    /// Durably append one turn, creating the session on first append.
    ///
    /// Turn insert and session-record update happen atomically. Returns the
    /// updated session record.
    fn append_turn(&self, turn: &ConversationTurn) -> Result<SessionRecord>;

    /// Read up to `limit` turns after skipping the `offset` most recent ones.
    ///
    /// Results are in chronological order. An unknown session yields an
    /// empty list.
    fn read_turns(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationTurn>>;

    /// Number of persisted turns for a session.
    fn count_turns(&self, session_id: &str) -> Result<usize>;

    /// Remove a session's turns, summaries, and directory record together.
    ///
    /// Returns `true` if the session existed.
    fn delete_session(&self, session_id: &str) -> Result<bool>;
}

/// Directory of sessions with their metadata.
pub trait SessionIndex: Send + Sync {
    /// Create the record if missing, otherwise bump `updated_at`.
    fn upsert_session(&self, session_id: &str, owner_id: Option<&str>) -> Result<SessionRecord>;

    /// Look up one session.
    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// List sessions, most recently active first.
    fn list_sessions(
        &self,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>>;

    /// Remove the directory record. Stores with cascading foreign keys
    /// drop the session's turns along with it.
    fn remove_session(&self, session_id: &str) -> Result<bool>;

    /// Record that a summary now covers the first `through` turns.
    fn mark_summarized(&self, session_id: &str, through: usize) -> Result<()>;

    /// Sessions whose last activity is strictly before `cutoff`.
    fn inactive_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Authoritative catalog of knowledge entries.
pub trait KnowledgeStore: Send + Sync {
    /// Create an entry with a fresh id.
    fn insert_entry(&self, draft: KnowledgeDraft) -> Result<KnowledgeEntry>;

    /// Get an entry by id. `Ok(None)` if absent.
    fn get_entry(&self, id: EntryId) -> Result<Option<KnowledgeEntry>>;

    /// Replace an entry's fields. `NotFound` if absent.
    fn update_entry(&self, id: EntryId, draft: KnowledgeDraft) -> Result<KnowledgeEntry>;

    /// Delete an entry. Returns `true` if it existed.
    fn delete_entry(&self, id: EntryId) -> Result<bool>;

    /// Page through entries, most recently updated first. With a category,
    /// only entries in that category are returned.
    fn list_entries(
        &self,
        category: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KnowledgeEntry>>;

    /// Distinct non-empty categories, sorted.
    fn categories(&self) -> Result<Vec<String>>;

    /// Every entry, most recently updated first.
    fn all_entries(&self) -> Result<Vec<KnowledgeEntry>>;

    /// Number of entries.
    fn count_entries(&self) -> Result<usize>;
}

/// Storage for conversation summaries.
pub trait SummaryStore: Send + Sync {
    /// Save a summary and advance the session's `summarized_through`.
    fn save_summary(&self, summary: &ConversationSummary) -> Result<()>;

    /// Most recent summary for a session.
    fn latest_summary(&self, session_id: &str) -> Result<Option<ConversationSummary>>;
}
