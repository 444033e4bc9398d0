//! Error types for session cache operations.

/// Error type for session cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session was not found in cache or storage.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Error from the rehydration backend.
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type for session cache operations.
pub type Result<T> = std::result::Result<T, Error>;
