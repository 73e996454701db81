//! Error types for cache gate operations
//!
//! Generation failures are cloneable: a single in-flight generation hands the
//! same outcome to every caller waiting on it, including the failure.

use thiserror::Error;

/// Main error type for cache gate operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The generator invoked for a missing key failed (or panicked)
    #[error("Generation failed for key '{key}': {message}")]
    Generation { key: String, message: String },

    /// The gate has been closed and no longer accepts generations
    #[error("Cache gate is closed")]
    Closed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for cache gate operations
pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    /// Build a generation failure from any displayable error
    pub fn generation(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        GateError::Generation {
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error came from a failed generator
    pub fn is_generation(&self) -> bool {
        matches!(self, GateError::Generation { .. })
    }
}
