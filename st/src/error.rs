//! Error types for the store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing records
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task lookup by id failed
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A stored value could not be decoded
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}
