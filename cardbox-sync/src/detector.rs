//! Change detection between a cached snapshot and the current state.
//!
//! Each replica side (local, remote) gets its own detector. The detector
//! keeps one snapshot cache per entity type; a detection pass diffs the
//! current records against the cache and then atomically replaces it, so
//! an unchanged replica produces zero diffs on the next pass.
//!
//! Hashing is the fast path: records whose canonical content hash matches
//! the cached hash are skipped without any field comparison.

use crate::diff::{EntityDiff, FieldChange};
use cardbox_types::{
    comparable_fields, content_hash, field_value, EntityId, EntityRecord, EntityType,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// One cached record plus its precomputed content hash.
#[derive(Debug, Clone)]
struct CachedEntry {
    record: EntityRecord,
    hash: String,
}

/// Snapshot cache for one entity type. `None` until the first successful
/// detection pass.
type Snapshot = Option<HashMap<EntityId, CachedEntry>>;

/// Detects changes for one replica side.
pub struct ChangeDetector {
    /// Per-type caches. Each type has its own lock so detection for
    /// different entity types can run concurrently.
    caches: HashMap<EntityType, RwLock<Snapshot>>,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    /// Creates a detector with empty caches for every entity type.
    #[must_use]
    pub fn new() -> Self {
        let caches = EntityType::ALL
            .iter()
            .map(|t| (*t, RwLock::new(None)))
            .collect();
        Self { caches }
    }

    /// Diffs `current` against the cached snapshot for `entity_type`,
    /// then replaces the cache with `current`.
    ///
    /// The cache is only replaced at the end of the pass, and the write
    /// lock is held for the whole pass, so concurrent calls for the same
    /// entity type serialize instead of interleaving.
    pub async fn detect(
        &self,
        entity_type: EntityType,
        current: &[EntityRecord],
    ) -> Vec<EntityDiff> {
        let cache = self
            .caches
            .get(&entity_type)
            .expect("detector has a cache per entity type");
        let mut guard = cache.write().await;

        let mut next: HashMap<EntityId, CachedEntry> = HashMap::with_capacity(current.len());
        for record in current {
            next.insert(
                record.id.clone(),
                CachedEntry {
                    record: record.clone(),
                    hash: content_hash(record),
                },
            );
        }

        let diffs = match guard.as_ref() {
            // First detection for this type: everything is a create.
            None => current.iter().cloned().map(EntityDiff::create).collect(),
            Some(prior) => Self::diff_snapshots(entity_type, prior, &next),
        };

        debug!(
            entity_type = %entity_type,
            current = current.len(),
            diffs = diffs.len(),
            "detection pass complete"
        );

        *guard = Some(next);
        diffs
    }

    /// Diffs an incremental read (only records changed since a cursor)
    /// against the cached snapshot, merging instead of replacing.
    ///
    /// An incremental read omits unchanged records, so their absence must
    /// not be read as deletion: this pass emits only creates and updates,
    /// and upserts the changed records into the cache.
    pub async fn detect_incremental(
        &self,
        entity_type: EntityType,
        changed: &[EntityRecord],
    ) -> Vec<EntityDiff> {
        let cache = self
            .caches
            .get(&entity_type)
            .expect("detector has a cache per entity type");
        let mut guard = cache.write().await;
        let prior = guard.get_or_insert_with(HashMap::new);

        let mut diffs = Vec::new();
        for record in changed {
            let entry = CachedEntry {
                record: record.clone(),
                hash: content_hash(record),
            };
            match prior.get(&record.id) {
                Some(old) if old.hash == entry.hash => {}
                Some(old) => {
                    let fields = Self::changed_fields(&old.record, record);
                    if !fields.is_empty() {
                        diffs.push(EntityDiff::update(record.clone(), fields));
                    }
                }
                None => diffs.push(EntityDiff::create(record.clone())),
            }
            prior.insert(record.id.clone(), entry);
        }

        diffs.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        debug!(
            entity_type = %entity_type,
            changed = changed.len(),
            diffs = diffs.len(),
            "incremental detection pass complete"
        );
        diffs
    }

    /// Clears the cache for one entity type, forcing the next pass to emit
    /// everything as creates.
    pub async fn reset(&self, entity_type: EntityType) {
        if let Some(cache) = self.caches.get(&entity_type) {
            *cache.write().await = None;
        }
    }

    fn diff_snapshots(
        entity_type: EntityType,
        prior: &HashMap<EntityId, CachedEntry>,
        next: &HashMap<EntityId, CachedEntry>,
    ) -> Vec<EntityDiff> {
        let mut diffs = Vec::new();

        for (id, entry) in next {
            match prior.get(id) {
                None => diffs.push(EntityDiff::create(entry.record.clone())),
                // Hash match means identical content; skip field comparison.
                Some(old) if old.hash == entry.hash => {}
                Some(old) => {
                    let changed = Self::changed_fields(&old.record, &entry.record);
                    // A hash mismatch with no comparable-field change can
                    // only come from non-comparable payload data; nothing
                    // to sync in that case.
                    if !changed.is_empty() {
                        diffs.push(EntityDiff::update(entry.record.clone(), changed));
                    }
                }
            }
        }

        for (id, entry) in prior {
            if !next.contains_key(id) {
                diffs.push(EntityDiff::delete(
                    entity_type,
                    id.clone(),
                    entry.record.version,
                ));
            }
        }

        // Deterministic output order regardless of map iteration.
        diffs.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        diffs
    }

    /// Exact changed fields via deep equality over the declared comparable
    /// fields for the entity type.
    fn changed_fields(
        old: &EntityRecord,
        new: &EntityRecord,
    ) -> BTreeMap<String, FieldChange> {
        let mut changed = BTreeMap::new();
        for field in comparable_fields(new.entity_type()) {
            let old_value = field_value(old, field);
            let new_value = field_value(new, field);
            if old_value != new_value {
                changed.insert(
                    (*field).to_string(),
                    FieldChange {
                        old_value,
                        new_value,
                    },
                );
            }
        }
        changed
    }
}
