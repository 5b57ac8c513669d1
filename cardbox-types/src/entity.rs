//! Entity records and typed payloads.
//!
//! The sync engine replicates four kinds of records: cards, folders, tags,
//! and images. Each kind carries a fixed field set expressed as a variant of
//! [`EntityPayload`], so diffing and merging work over statically known
//! fields rather than untyped maps.

use crate::{EntityId, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of entity a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Card,
    Folder,
    Tag,
    Image,
}

impl EntityType {
    /// All entity types, in the order a sync session processes them.
    pub const ALL: [EntityType; 4] = [
        EntityType::Card,
        EntityType::Folder,
        EntityType::Tag,
        EntityType::Image,
    ];

    /// Returns the wire/storage name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Card => "card",
            EntityType::Folder => "folder",
            EntityType::Tag => "tag",
            EntityType::Image => "image",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(EntityType::Card),
            "folder" => Ok(EntityType::Folder),
            "tag" => Ok(EntityType::Tag),
            "image" => Ok(EntityType::Image),
            other => Err(Error::UnknownEntityType(other.to_string())),
        }
    }
}

/// A single field's value, as seen by the differ.
///
/// Alias kept separate so call sites read as "field value", not "arbitrary
/// JSON" — the values always come from a typed payload.
pub type FieldValue = serde_json::Value;

/// The typed payload of an entity, one variant per entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityPayload {
    /// A card: the primary user-visible record.
    Card {
        title: String,
        body: String,
        /// Folder containing the card, if any.
        folder_id: Option<EntityId>,
        /// Tags attached to the card, sorted for canonical form.
        tag_ids: Vec<EntityId>,
        starred: bool,
    },

    /// A folder grouping cards.
    Folder {
        name: String,
        parent_id: Option<EntityId>,
        /// Manual sort position among siblings.
        position: i64,
    },

    /// A label attachable to cards.
    Tag {
        name: String,
        /// CSS-style hex color, e.g. `#ff8800`.
        color: String,
    },

    /// An image attachment. The binary itself lives in blob storage;
    /// only metadata is synced here.
    Image {
        file_name: String,
        mime_type: String,
        size_bytes: u64,
        /// SHA-256 of the blob contents.
        checksum: String,
        card_id: Option<EntityId>,
    },
}

impl EntityPayload {
    /// Returns the entity type this payload belongs to.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityPayload::Card { .. } => EntityType::Card,
            EntityPayload::Folder { .. } => EntityType::Folder,
            EntityPayload::Tag { .. } => EntityType::Tag,
            EntityPayload::Image { .. } => EntityType::Image,
        }
    }
}

/// One addressable record synchronized between local and remote stores.
///
/// `version` is a monotonic integer bumped by the store on every write;
/// `updated_at` is an audit timestamp. Both are bookkeeping and are excluded
/// from content hashing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Store-assigned identifier.
    pub id: EntityId,
    /// Monotonic version counter.
    pub version: u64,
    /// Last modification time (audit field).
    pub updated_at: DateTime<Utc>,
    /// The typed entity payload.
    pub payload: EntityPayload,
}

impl EntityRecord {
    /// Creates a new record at version 1.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, payload: EntityPayload) -> Self {
        Self {
            id: id.into(),
            version: 1,
            updated_at: Utc::now(),
            payload,
        }
    }

    /// Returns the entity type of the record.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    /// Returns a copy with the version bumped and `updated_at` refreshed.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self.updated_at = Utc::now();
        self
    }
}
