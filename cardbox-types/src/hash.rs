//! Canonical content hashing and field access for diffing.
//!
//! The change detector compares records by hash before doing any field-level
//! work. The hash covers only the typed payload — never the primary key, the
//! version counter, or the audit timestamp — so a store-side version bump
//! with identical content hashes the same.

use crate::{EntityRecord, EntityType, FieldValue};
use sha2::{Digest, Sha256};

/// Computes the canonical content hash of a record.
///
/// Serialization of the payload enum is deterministic: struct variants
/// serialize their fields in declaration order, so equal payloads always
/// produce equal hashes.
#[must_use]
pub fn content_hash(record: &EntityRecord) -> String {
    let canonical = serde_json::to_string(&record.payload)
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the declared comparable field names for an entity type.
///
/// These are the fields the differ inspects once a hash mismatch is found.
#[must_use]
pub fn comparable_fields(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Card => &["title", "body", "folder_id", "tag_ids", "starred"],
        EntityType::Folder => &["name", "parent_id", "position"],
        EntityType::Tag => &["name", "color"],
        EntityType::Image => &["file_name", "mime_type", "size_bytes", "checksum", "card_id"],
    }
}

/// Extracts one named field from a record's payload as a JSON value.
///
/// Returns `Value::Null` for a field the payload does not carry, which
/// compares equal to an absent field on the other side.
#[must_use]
pub fn field_value(record: &EntityRecord, field: &str) -> FieldValue {
    let payload = serde_json::to_value(&record.payload).unwrap_or_default();
    payload
        .get(field)
        .cloned()
        .unwrap_or(FieldValue::Null)
}
