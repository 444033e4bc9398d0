//! Core data types for sessions, turns, and the knowledge catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};

/// Free-form key/value metadata attached to a turn.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current time at the microsecond precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from the hyphenated string form.
            pub fn parse(s: &str) -> Result<Self> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = MemoryError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a conversation turn.
    TurnId
);

uuid_id!(
    /// Unique identifier of a knowledge entry.
    EntryId
);

// ─────────────────────────────────────────────────────────────────────────────
// Turns
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Storage name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(MemoryError::InvalidData(format!("unknown role: {}", other))),
        }
    }
}

/// One message within a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: TurnId,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// Owning user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Assistant turns carry `model` and `usage` here.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time.
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            turn_id: TurnId::new(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            owner_id: None,
            metadata: Metadata::new(),
            created_at: now(),
        }
    }

    /// Create a user turn.
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, content)
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Directory entry describing one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Always equals the number of persisted turns.
    pub turn_count: usize,
    /// Turn count covered by the most recent summary.
    pub summarized_through: usize,
}

impl SessionRecord {
    /// Default title for a freshly created session.
    pub fn default_title(session_id: &str) -> String {
        let short: String = session_id.chars().take(8).collect();
        format!("Session {}", short)
    }

    /// Turns appended since the last summary.
    pub fn turns_since_summary(&self) -> usize {
        self.turn_count.saturating_sub(self.summarized_through)
    }
}

/// A condensed form of older turns in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub summary: String,
    /// Number of turns the summary accounts for.
    pub covers_turns: usize,
    pub created_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn new(session_id: impl Into<String>, summary: impl Into<String>, covers_turns: usize) -> Self {
        Self {
            session_id: session_id.into(),
            summary: summary.into(),
            covers_turns,
            created_at: now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge
// ─────────────────────────────────────────────────────────────────────────────

/// A curated fact, FAQ answer, or product description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: EntryId,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Text handed to the embedder for this entry.
    pub fn document(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// Caller-supplied fields for creating or replacing a knowledge entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDraft {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl KnowledgeDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vectors
// ─────────────────────────────────────────────────────────────────────────────

/// Similarity-search projection of a knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: EntryId,
    pub vector: Vec<f32>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl VectorEntry {
    /// Project an entry with its embedding.
    pub fn from_entry(entry: &KnowledgeEntry, vector: Vec<f32>) -> Self {
        Self {
            id: entry.id,
            vector,
            title: entry.title.clone(),
            category: entry.category.clone(),
            tags: entry.tags.clone(),
        }
    }
}

/// One nearest-neighbour hit. Higher score is closer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: EntryId,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_parse_roundtrip() {
        let id = EntryId::new();
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(TurnId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn test_turn_builders() {
        let turn = ConversationTurn::assistant("s1", "hello")
            .with_owner(Some("u1".into()))
            .with_metadata("model", serde_json::json!("mock"));
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.owner_id.as_deref(), Some("u1"));
        assert_eq!(turn.metadata["model"], "mock");
    }

    #[test]
    fn test_default_title() {
        assert_eq!(
            SessionRecord::default_title("abcdefghijkl"),
            "Session abcdefgh"
        );
        assert_eq!(SessionRecord::default_title("ab"), "Session ab");
    }

    #[test]
    fn test_draft_tags_deduplicate() {
        let draft = KnowledgeDraft::new("t", "b").with_tags(["a", "b", "a"]);
        assert_eq!(draft.tags.len(), 2);
    }
}
