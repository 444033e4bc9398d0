//! Error types for the memory crate.

use thiserror::Error;

/// Storage failures.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// SQLite rejected an operation.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored JSON column could not be read or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A statement or its parameters were rejected before reaching SQLite.
    #[error("Query error: {0}")]
    Query(String),

    /// No row with the given key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The on-disk schema cannot be brought to the current version.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored identifier is not a UUID.
    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    /// Input or stored data breaks a store invariant.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
