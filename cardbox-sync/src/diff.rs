//! Entity diffs produced by the change detector.
//!
//! A diff describes how one entity changed between the cached snapshot and
//! the current state of one replica. Diffs are immutable once produced and
//! live only for the duration of a sync session.

use cardbox_types::{content_hash, EntityId, EntityRecord, EntityType, FieldValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    Create,
    Update,
    Delete,
}

impl DiffOperation {
    /// Returns the wire name of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffOperation::Create => "create",
            DiffOperation::Update => "update",
            DiffOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Old and new values for one changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

/// A computed delta for one entity between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDiff {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub operation: DiffOperation,
    /// Field name to old/new value pairs. Empty for creates and deletes.
    pub changed_fields: BTreeMap<String, FieldChange>,
    /// Version of the record the diff was computed from.
    pub version: u64,
    /// When the diff was produced.
    pub timestamp: DateTime<Utc>,
    /// Canonical content hash of the current record, empty for deletes.
    pub content_hash: String,
    /// The current record, carried so operations can apply creates and
    /// updates without a second store read. `None` for deletes.
    pub record: Option<EntityRecord>,
}

impl EntityDiff {
    /// A diff for a newly appeared entity.
    #[must_use]
    pub fn create(record: EntityRecord) -> Self {
        Self {
            entity_id: record.id.clone(),
            entity_type: record.entity_type(),
            operation: DiffOperation::Create,
            changed_fields: BTreeMap::new(),
            version: record.version,
            timestamp: Utc::now(),
            content_hash: content_hash(&record),
            record: Some(record),
        }
    }

    /// A diff for a changed entity with its exact field changes.
    #[must_use]
    pub fn update(record: EntityRecord, changed_fields: BTreeMap<String, FieldChange>) -> Self {
        Self {
            entity_id: record.id.clone(),
            entity_type: record.entity_type(),
            operation: DiffOperation::Update,
            changed_fields,
            version: record.version,
            timestamp: Utc::now(),
            content_hash: content_hash(&record),
            record: Some(record),
        }
    }

    /// A diff for an entity that disappeared since the cached snapshot.
    #[must_use]
    pub fn delete(entity_type: EntityType, entity_id: EntityId, version: u64) -> Self {
        Self {
            entity_id,
            entity_type,
            operation: DiffOperation::Delete,
            changed_fields: BTreeMap::new(),
            version,
            timestamp: Utc::now(),
            content_hash: String::new(),
            record: None,
        }
    }

    /// Whether the diff removes the entity.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == DiffOperation::Delete
    }

    /// Names of the changed fields.
    pub fn changed_field_names(&self) -> impl Iterator<Item = &str> {
        self.changed_fields.keys().map(String::as_str)
    }
}
