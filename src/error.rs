//! Error types for prompt cache operations
//!
//! Validation and duplicate-key errors are raised close to the store and are
//! normally handled inside the write path. Store availability errors are
//! surfaced to the caller unchanged.

use thiserror::Error;

/// Main error type for prompt cache operations
#[derive(Error, Debug)]
pub enum PromptCacheError {
    /// A field is outside its documented range
    #[error("Validation error on `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Another live entry already holds the exact cache key
    #[error("Duplicate cache key: {key}")]
    DuplicateKey { key: String },

    /// Optimistic write retries were exhausted
    #[error("Write contention: gave up after {attempts} attempts")]
    WriteContention { attempts: u32 },

    /// The backing store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Query execution error
    #[error("Query error: {0}")]
    QueryError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Neo4rs driver error (wrapper)
    #[error("Neo4rs driver error: {0}")]
    DriverError(#[from] neo4rs::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl PromptCacheError {
    /// Shorthand for a validation failure
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        PromptCacheError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// True when the caller should fall back to generating without the cache
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            PromptCacheError::StoreUnavailable(_) | PromptCacheError::DriverError(_)
        )
    }
}

/// Result type alias for prompt cache operations
pub type Result<T> = std::result::Result<T, PromptCacheError>;

impl From<String> for PromptCacheError {
    fn from(s: String) -> Self {
        PromptCacheError::Other(s)
    }
}

impl From<&str> for PromptCacheError {
    fn from(s: &str) -> Self {
        PromptCacheError::Other(s.to_string())
    }
}
