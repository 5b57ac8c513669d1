//! Error types for the storage boundary.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur at the storage boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(String),

    /// A remote call failed at the network layer.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store rejected a well-formed request.
    #[error("server error: {0}")]
    Server(String),

    /// Serialization of a persisted record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record could not be decoded.
    #[error("corrupt record {id}: {detail}")]
    CorruptRecord { id: String, detail: String },

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
