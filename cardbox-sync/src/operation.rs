//! Sync operations and the diff-to-operation builder.

use crate::diff::{DiffOperation, EntityDiff, FieldChange};
use crate::error::{SyncError, SyncResult};
use cardbox_types::{EntityId, EntityRecord, EntityType, OperationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Execution priority of an operation. Ordered ascending so `max` picks the
/// most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Which replica produced the change the operation carries.
///
/// Local-sourced operations push to the remote store; remote-sourced
/// operations apply to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSide {
    Local,
    Remote,
}

/// The data an operation carries to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    /// Record to write for creates and updates; `None` for deletes.
    pub record: Option<EntityRecord>,
    /// Exact field changes, for conflict inspection and merge.
    pub changed_fields: BTreeMap<String, FieldChange>,
    /// Version of the source record.
    pub version: u64,
    /// Canonical content hash of the source record.
    pub content_hash: String,
}

/// One typed, prioritized unit of sync work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: OperationId,
    pub op: DiffOperation,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub payload: OperationPayload,
    pub priority: Priority,
    /// Bumped by the executor on each retry of the owning batch.
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    pub source: SourceSide,
}

impl SyncOperation {
    /// Estimated serialized payload size in bytes, used for batch packing
    /// and transfer accounting.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|v| v.len()).unwrap_or(0)
    }

    /// Whether this is a high-priority delete (forces batch escalation).
    #[must_use]
    pub fn is_priority_delete(&self) -> bool {
        self.op == DiffOperation::Delete && self.priority >= Priority::High
    }
}

/// Builds sync operations from entity diffs.
///
/// Pure construction: the builder has no side effects and never fails for
/// well-formed diffs.
pub struct OperationBuilder;

impl OperationBuilder {
    /// Maps one diff to one operation using the standard priority policy:
    /// deletes are high, image creates/updates are low (bandwidth
    /// deprioritized), everything else is normal.
    pub fn build(diff: &EntityDiff, source: SourceSide) -> SyncResult<SyncOperation> {
        Self::build_with_priority(diff, source, Self::priority_for(diff))
    }

    /// Maps one diff to one operation at an explicitly escalated priority
    /// (e.g. user-triggered edits).
    pub fn build_escalated(diff: &EntityDiff, source: SourceSide) -> SyncResult<SyncOperation> {
        Self::build_with_priority(diff, source, Priority::High)
    }

    fn build_with_priority(
        diff: &EntityDiff,
        source: SourceSide,
        priority: Priority,
    ) -> SyncResult<SyncOperation> {
        if diff.entity_id.is_empty() {
            return Err(SyncError::Validation(format!(
                "diff for {} {} has no entity id",
                diff.entity_type, diff.operation
            )));
        }
        if diff.operation != DiffOperation::Delete && diff.record.is_none() {
            return Err(SyncError::Validation(format!(
                "{} diff for {} {} carries no record",
                diff.operation, diff.entity_type, diff.entity_id
            )));
        }

        Ok(SyncOperation {
            id: OperationId::new(),
            op: diff.operation,
            entity_type: diff.entity_type,
            entity_id: diff.entity_id.clone(),
            payload: OperationPayload {
                record: diff.record.clone(),
                changed_fields: diff.changed_fields.clone(),
                version: diff.version,
                content_hash: diff.content_hash.clone(),
            },
            priority,
            retry_count: 0,
            timestamp: diff.timestamp,
            source,
        })
    }

    fn priority_for(diff: &EntityDiff) -> Priority {
        match diff.operation {
            DiffOperation::Delete => Priority::High,
            DiffOperation::Create | DiffOperation::Update
                if diff.entity_type == EntityType::Image =>
            {
                Priority::Low
            }
            _ => Priority::Normal,
        }
    }
}
