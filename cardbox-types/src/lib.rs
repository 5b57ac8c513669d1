//! Core type definitions for the Cardbox sync engine.
//!
//! This crate defines the fundamental types shared by the sync pipeline:
//! - Entity and operation/batch/conflict identifiers
//! - The `EntityType` enum and the typed `EntityPayload` sum type
//! - `EntityRecord`, the unit of replication
//! - Canonical content hashing used for cheap change detection
//! - Conflict records and the conflict state machine vocabulary
//!
//! Storage, networking, and sync logic live in their own crates; nothing
//! here performs I/O.

mod conflict;
mod entity;
mod hash;
mod ids;

pub use conflict::{
    ConflictSeverity, ConflictState, ConflictStatus, ConflictType, Resolution, ResolutionStrategy,
};
pub use entity::{EntityPayload, EntityRecord, EntityType, FieldValue};
pub use hash::{comparable_fields, content_hash, field_value};
pub use ids::{BatchId, ConflictId, EntityId, OperationId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}
