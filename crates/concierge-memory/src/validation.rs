//! Validation for data entering the stores.
//!
//! Covers session identifiers, knowledge drafts, and embedding vectors.

use crate::error::{MemoryError, Result};
use crate::types::KnowledgeDraft;

/// Longest accepted session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation failures for stored data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Session ID is empty.
    #[error("session ID is empty")]
    EmptySessionId,

    /// Session ID exceeds the length limit.
    #[error("session ID is longer than {max} characters")]
    SessionIdTooLong { max: usize },

    /// Session ID contains a disallowed character.
    #[error("session ID contains invalid character {0:?}")]
    InvalidSessionIdChar(char),

    /// Knowledge entry title is blank.
    #[error("knowledge entry title is empty")]
    EmptyTitle,

    /// Knowledge entry body is blank.
    #[error("knowledge entry body is empty")]
    EmptyBody,

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding contains NaN or Inf.
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },
}

impl From<ValidationError> for MemoryError {
    fn from(err: ValidationError) -> Self {
        MemoryError::InvalidData(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session ID Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a session ID: 1-128 characters from `[A-Za-z0-9_.:-]`.
pub fn validate_session_id(session_id: &str) -> std::result::Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::EmptySessionId);
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(ValidationError::SessionIdTooLong {
            max: MAX_SESSION_ID_LEN,
        });
    }
    if let Some(bad) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')))
    {
        return Err(ValidationError::InvalidSessionIdChar(bad));
    }
    Ok(())
}

/// Validate a session ID, converting to [`MemoryError`].
pub fn validate_session_id_result(session_id: &str) -> Result<()> {
    validate_session_id(session_id).map_err(MemoryError::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a knowledge draft before it is stored.
pub fn validate_draft(draft: &KnowledgeDraft) -> std::result::Result<(), ValidationError> {
    if draft.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if draft.body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate an embedding's dimension and values.
pub fn validate_embedding(
    embedding: &[f32],
    expected_dim: usize,
) -> std::result::Result<(), ValidationError> {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding.iter().filter(|v| !v.is_finite()).count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_accepts_allowed_charset() {
        assert!(validate_session_id("abc-123_x.y:z").is_ok());
        assert!(validate_session_id(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_session_id_rejects_bad_input() {
        assert_eq!(validate_session_id(""), Err(ValidationError::EmptySessionId));
        assert_eq!(
            validate_session_id(&"a".repeat(129)),
            Err(ValidationError::SessionIdTooLong { max: 128 })
        );
        assert_eq!(
            validate_session_id("has space"),
            Err(ValidationError::InvalidSessionIdChar(' '))
        );
        assert!(validate_session_id("../etc").is_err());
    }

    #[test]
    fn test_session_id_result_maps_to_invalid_data() {
        let err = validate_session_id_result("").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidData(_)));
    }

    #[test]
    fn test_validate_draft() {
        assert!(validate_draft(&KnowledgeDraft::new("Title", "Body")).is_ok());
        assert_eq!(
            validate_draft(&KnowledgeDraft::new("  ", "Body")),
            Err(ValidationError::EmptyTitle)
        );
        assert_eq!(
            validate_draft(&KnowledgeDraft::new("Title", "")),
            Err(ValidationError::EmptyBody)
        );
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2], 2).is_ok());
        assert_eq!(
            validate_embedding(&[0.1], 2),
            Err(ValidationError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            validate_embedding(&[f32::NAN, f32::INFINITY], 2),
            Err(ValidationError::InvalidEmbeddingValues { count: 2 })
        );
    }
}
