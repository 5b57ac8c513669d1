//! Error types for the sync layer.
//!
//! The taxonomy follows the retry policy: validation and state-transition
//! errors are caller bugs and never retried; network, server, and timeout
//! errors go through the backoff path; persistence errors are counted and
//! surfaced through diagnostics without blocking in-memory progress.

use cardbox_store::StorageError;
use cardbox_types::{ConflictId, ConflictStatus, EntityId, EntityType};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A malformed diff or operation was rejected before entering the
    /// pipeline. Non-retryable.
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote call failed at the network layer. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store rejected a well-formed request. Retryable up to
    /// the configured limit.
    #[error("server error: {0}")]
    Server(String),

    /// A network-facing operation exceeded its timeout. Retryable.
    #[error("operation timed out")]
    Timeout,

    /// An invalid conflict state transition was requested. Caller bug,
    /// non-retryable.
    #[error("invalid conflict transition for {conflict_id}: {from} -> {to}")]
    InvalidTransition {
        conflict_id: ConflictId,
        from: ConflictStatus,
        to: ConflictStatus,
    },

    /// The referenced conflict does not exist.
    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// A resolution attempt needs data the caller did not supply
    /// (e.g. manual resolution without a chosen record).
    #[error("resolution error for {entity_type} {entity_id}: {detail}")]
    Resolution {
        entity_type: EntityType,
        entity_id: EntityId,
        detail: String,
    },

    /// Resolution retries for a conflict are exhausted.
    #[error("retries exhausted for conflict {0}")]
    RetriesExhausted(ConflictId),

    /// A durable write failed. Counted, does not block in-memory state.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Local storage failed outside the retry path.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the error should go through the retry/backoff path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::Server(_) | SyncError::Timeout
        )
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Network(msg) => SyncError::Network(msg),
            StorageError::Server(msg) => SyncError::Server(msg),
            other => SyncError::Storage(other.to_string()),
        }
    }
}
