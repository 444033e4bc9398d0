//! Error types for the LLM crate.

use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for generation and embedding calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider returned an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transport failure talking to the provider.
    #[error("Network error: {0}")]
    Network(String),

    /// Provider is misconfigured (missing key, bad URL).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request or response could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The request was rejected before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider rate limit hit.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The call did not finish before its deadline.
    #[error("Generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The call was cancelled by the caller.
    #[error("Generation cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::Network("timeout".to_string()).is_retryable());
        assert!(LlmError::RateLimit("rate limited".to_string()).is_retryable());
        assert!(!LlmError::Config("bad config".to_string()).is_retryable());
        assert!(!LlmError::Auth("unauthorized".to_string()).is_retryable());
        assert!(!LlmError::Backend("server error".to_string()).is_retryable());
        assert!(!LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = LlmError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Generation timed out after 30s");
        assert_eq!(LlmError::Cancelled.to_string(), "Generation cancelled");
    }
}
