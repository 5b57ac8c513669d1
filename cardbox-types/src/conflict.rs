//! Conflict records and the conflict state machine vocabulary.
//!
//! A conflict is a detected disagreement between the local and remote
//! replicas for one entity. The record is created by the conflict detector,
//! owned by the lifecycle manager, and persisted across restarts. The
//! legal status transitions are:
//!
//! ```text
//! pending -> detecting -> resolving -> resolved
//!                                   -> failed
//! ```
//!
//! `resolved` and `failed` are terminal. Anything else is a caller bug and
//! must be rejected by the lifecycle manager.

use crate::{ConflictId, EntityId, EntityRecord, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of what disagrees between the two replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// Version counters diverged without comparable content.
    Version,
    /// Both sides changed the same content.
    Content,
    /// Parent/child or containment structure diverged.
    Structure,
    /// One side deleted while the other modified.
    Delete,
    /// A specific field diverged.
    Field,
}

impl ConflictType {
    /// Returns the storage name of the conflict type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Version => "version",
            ConflictType::Content => "content",
            ConflictType::Structure => "structure",
            ConflictType::Delete => "delete",
            ConflictType::Field => "field",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a conflict threatens data integrity.
///
/// Ordered so thresholds can use comparisons, not equality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    /// Returns the storage name of the severity.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
            ConflictSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle status of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    /// Newly detected, awaiting evaluation.
    Pending,
    /// Being re-examined against current local/remote state.
    Detecting,
    /// A resolution strategy is being applied.
    Resolving,
    /// Resolution applied to both sides. Terminal.
    Resolved,
    /// Retries exhausted or explicitly aborted. Terminal.
    Failed,
}

impl ConflictStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConflictStatus::Resolved | ConflictStatus::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(&self, next: ConflictStatus) -> bool {
        matches!(
            (self, next),
            (ConflictStatus::Pending, ConflictStatus::Detecting)
                | (ConflictStatus::Detecting, ConflictStatus::Resolving)
                | (ConflictStatus::Resolving, ConflictStatus::Resolved)
                | (ConflictStatus::Resolving, ConflictStatus::Failed)
        )
    }

    /// Returns the storage name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::Detecting => "detecting",
            ConflictStatus::Resolving => "resolving",
            ConflictStatus::Resolved => "resolved",
            ConflictStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The strategy used to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Local replica wins wholesale.
    LocalWins,
    /// Remote replica wins wholesale.
    RemoteWins,
    /// Field-level merge of both sides.
    Merge,
    /// A user picked the outcome explicitly.
    Manual,
}

impl ResolutionStrategy {
    /// Returns the storage name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LocalWins => "local_wins",
            ResolutionStrategy::RemoteWins => "remote_wins",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a resolution attempt, recorded on the conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Strategy that was applied.
    pub strategy: ResolutionStrategy,
    /// Whether the resolution was applied to both sides.
    pub success: bool,
    /// Human-readable reasoning for the chosen outcome.
    pub reasoning: String,
    /// When the resolution completed.
    pub resolved_at: DateTime<Utc>,
}

/// A detected disagreement between local and remote state for one entity.
///
/// Timestamps serialize as ISO-8601 so persisted records stay readable and
/// portable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictState {
    pub id: ConflictId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub conflict_type: ConflictType,
    pub status: ConflictStatus,
    pub severity: ConflictSeverity,

    /// Snapshot of the local record at detection time, if it existed.
    pub local_data: Option<EntityRecord>,
    /// Snapshot of the remote record at detection time, if it existed.
    pub remote_data: Option<EntityRecord>,
    pub local_version: u64,
    pub remote_version: u64,
    pub local_timestamp: Option<DateTime<Utc>>,
    pub remote_timestamp: Option<DateTime<Utc>>,

    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// When `status` last changed. Equal to `detected_at` until the first
    /// transition.
    pub status_changed_at: DateTime<Utc>,
    /// How long detection took, in milliseconds.
    pub detection_time_ms: u64,
    /// Time from detection to resolution, set on exit from `resolving`.
    pub resolution_time_ms: Option<u64>,

    pub retry_count: u32,
    pub max_retries: u32,
    /// Recorded outcome once a resolution attempt finishes.
    pub resolution: Option<Resolution>,
    /// Whether the record has been written to durable storage.
    pub persisted: bool,
}

impl ConflictState {
    /// Creates a new pending conflict.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_type: EntityType,
        entity_id: EntityId,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        local_data: Option<EntityRecord>,
        remote_data: Option<EntityRecord>,
        max_retries: u32,
    ) -> Self {
        let local_version = local_data.as_ref().map(|r| r.version).unwrap_or(0);
        let remote_version = remote_data.as_ref().map(|r| r.version).unwrap_or(0);
        let local_timestamp = local_data.as_ref().map(|r| r.updated_at);
        let remote_timestamp = remote_data.as_ref().map(|r| r.updated_at);
        let now = Utc::now();
        Self {
            id: ConflictId::new(),
            entity_type,
            entity_id,
            conflict_type,
            status: ConflictStatus::Pending,
            severity,
            local_data,
            remote_data,
            local_version,
            remote_version,
            local_timestamp,
            remote_timestamp,
            detected_at: now,
            status_changed_at: now,
            detection_time_ms: 0,
            resolution_time_ms: None,
            retry_count: 0,
            max_retries,
            resolution: None,
            persisted: false,
        }
    }

    /// Age of the conflict relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.detected_at
    }

    /// How long the conflict has sat in its current status.
    #[must_use]
    pub fn time_in_status(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.status_changed_at
    }

    /// Whether the conflict still blocks sync for its entity.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}
