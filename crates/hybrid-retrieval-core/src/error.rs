//! Tagged error kinds shared by every capability boundary.
//!
//! Adapters, the cache, and the engine all return [`EngineError`] rather
//! than throwing; the engine matches on kind instead of inspecting
//! backend-specific strings.

use thiserror::Error;

/// Tagged error returned across every adapter and engine boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("not connected to {backend}")]
    NotConnected { backend: String },

    #[error("embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("backend error [{code}]: {message}")]
    Backend { code: String, message: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("value of {size} bytes exceeds the {limit} byte cap")]
    OversizedValue { size: usize, limit: usize },

    #[error("circuit breaker open, {retry_after_secs}s remaining")]
    CircuitOpen { retry_after_secs: u64 },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("i/o error: {message}")]
    Io { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl EngineError {
    /// Whether a caller could plausibly retry this error after a backoff.
    ///
    /// Mirrors the retryable/terminal split used by this codebase's cache
    /// circuit breaker: transient conditions (timeouts, a momentarily
    /// unavailable backend) are retryable; malformed input and schema
    /// mismatches are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NotConnected { .. }
                | EngineError::Timeout { .. }
                | EngineError::Backend { .. }
        )
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result alias used across every component boundary.
pub type EngineResult<T> = Result<T, EngineError>;
