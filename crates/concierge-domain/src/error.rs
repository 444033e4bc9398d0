//! Domain error types.

use concierge_llm::LlmError;
use concierge_memory::{MemoryError, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::retrieval::RetrievalError;

/// Domain-level errors.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Malformed input, rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[source] MemoryError),

    /// Session cache could not be rehydrated.
    #[error("Cache error: {0}")]
    Cache(#[from] concierge_session::Error),

    /// Generation or embedding capability failure.
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    /// Knowledge search failure.
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MemoryError> for DomainError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::NotFound(what) => DomainError::NotFound(what),
            MemoryError::InvalidData(reason) => DomainError::Validation(reason),
            other => DomainError::Storage(other),
        }
    }
}

impl From<ValidationError> for DomainError {
    fn from(err: ValidationError) -> Self {
        DomainError::Validation(err.to_string())
    }
}

/// Coarse error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Storage,
    Provider,
    Timeout,
    Cancelled,
    Retrieval,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Provider => "provider",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&LlmError> for ErrorKind {
    fn from(err: &LlmError) -> Self {
        match err {
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Provider,
        }
    }
}

impl DomainError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::Storage(_) | DomainError::Cache(_) => ErrorKind::Storage,
            DomainError::Provider(err) => ErrorKind::from(err),
            DomainError::Retrieval(_) => ErrorKind::Retrieval,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a validation failure.
    pub fn validation(reason: impl Into<String>) -> Self {
        DomainError::Validation(reason.into())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
