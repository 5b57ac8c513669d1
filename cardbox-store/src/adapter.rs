//! Store adapter abstraction.
//!
//! Defines the traits the sync engine consumes to reach the local and
//! remote entity collections, plus the authentication seam that scopes
//! every sync to a user. Concrete adapters (SQLite tables locally, the
//! backend RPC client remotely) live in the application; tests use the
//! in-memory mock below.

use crate::error::StorageResult;
use async_trait::async_trait;
use cardbox_types::{EntityId, EntityRecord, EntityType};

/// Identifier scoping synced data to one user account.
pub type UserScope = String;

/// Per-item outcome of a bulk apply call.
///
/// Bulk applies are not transactional: some items may land while others
/// fail, and the executor needs to know which.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// The entity the outcome refers to.
    pub entity_id: EntityId,
    /// `Ok(version)` with the store-assigned version on success, or the
    /// failure message.
    pub result: Result<u64, String>,
}

impl ItemOutcome {
    /// A successful outcome carrying the new store version.
    pub fn ok(entity_id: EntityId, version: u64) -> Self {
        Self {
            entity_id,
            result: Ok(version),
        }
    }

    /// A failed outcome with a reason.
    pub fn failed(entity_id: EntityId, reason: impl Into<String>) -> Self {
        Self {
            entity_id,
            result: Err(reason.into()),
        }
    }

    /// Whether the item was applied.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Read/write access to the local and remote entity collections.
///
/// The sync engine never touches entity storage directly; everything goes
/// through this trait. Bulk applies take a whole batch of records so the
/// adapter can issue one grouped remote call.
#[async_trait]
pub trait EntityStoreAdapter: Send + Sync {
    /// Returns all local entities of one type.
    async fn local_entities(&self, entity_type: EntityType) -> StorageResult<Vec<EntityRecord>>;

    /// Returns remote entities of one type changed since `since_version`.
    async fn remote_entities(
        &self,
        entity_type: EntityType,
        since_version: u64,
    ) -> StorageResult<Vec<EntityRecord>>;

    /// Creates the given records on the remote store.
    async fn apply_create(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>>;

    /// Updates the given records on the remote store.
    async fn apply_update(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>>;

    /// Deletes the given entities on the remote store.
    async fn apply_delete(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> StorageResult<Vec<ItemOutcome>>;

    /// Writes the given records into the local store (remote-sourced
    /// changes and resolution outcomes).
    async fn save_local(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>>;

    /// Deletes the given entities from the local store.
    async fn delete_local(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> StorageResult<Vec<ItemOutcome>>;

    /// Clears the local "pending upload" flag for entities a successful
    /// batch touched.
    async fn mark_synced(&self, entity_type: EntityType, ids: &[EntityId]) -> StorageResult<()>;

    /// Returns the last fully synced remote version for a user scope.
    async fn last_sync_version(&self, scope: &UserScope) -> StorageResult<u64>;

    /// Records the last fully synced remote version for a user scope.
    async fn set_last_sync_version(&self, scope: &UserScope, version: u64) -> StorageResult<()>;
}

/// Supplies the current user scope, if a user is signed in.
///
/// Sync is a no-op without a scope: sessions complete with an empty result
/// rather than erroring.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The signed-in user's scope, or `None` when signed out.
    async fn current_user_scope(&self) -> Option<UserScope>;
}

/// A fixed auth provider for tests and single-user deployments.
pub struct StaticAuth(pub Option<UserScope>);

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user_scope(&self) -> Option<UserScope> {
        self.0.clone()
    }
}

/// An in-memory store adapter for testing.
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Shared inner state so clones of the adapter observe the same store.
    #[derive(Default)]
    struct Inner {
        local: HashMap<EntityType, BTreeMap<EntityId, EntityRecord>>,
        remote: HashMap<EntityType, BTreeMap<EntityId, EntityRecord>>,
        pending: HashSet<(EntityType, EntityId)>,
        sync_versions: HashMap<UserScope, u64>,
        remote_version_counter: u64,
        /// Queued whole-call failures, consumed in order.
        fail_next: VecDeque<String>,
        /// Entities whose individual items always fail on apply.
        failing_entities: HashSet<EntityId>,
        read_failures: HashSet<EntityType>,
        apply_calls: usize,
    }

    /// An in-memory [`EntityStoreAdapter`] with scripted failures.
    #[derive(Clone, Default)]
    pub struct MemoryAdapter {
        inner: Arc<Mutex<Inner>>,
    }

    impl MemoryAdapter {
        /// Creates an empty adapter.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a local record.
        pub fn insert_local(&self, record: EntityRecord) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .local
                .entry(record.entity_type())
                .or_default()
                .insert(record.id.clone(), record);
        }

        /// Seeds a remote record.
        pub fn insert_remote(&self, record: EntityRecord) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .remote
                .entry(record.entity_type())
                .or_default()
                .insert(record.id.clone(), record);
        }

        /// Marks an entity as pending upload.
        pub fn mark_pending(&self, entity_type: EntityType, id: EntityId) {
            self.inner.lock().unwrap().pending.insert((entity_type, id));
        }

        /// Whether an entity is still flagged pending.
        pub fn is_pending(&self, entity_type: EntityType, id: &EntityId) -> bool {
            self.inner
                .lock()
                .unwrap()
                .pending
                .contains(&(entity_type, id.clone()))
        }

        /// Queues the next `n` apply calls to fail wholesale with `reason`.
        pub fn fail_next_applies(&self, n: usize, reason: impl Into<String>) {
            let reason = reason.into();
            let mut inner = self.inner.lock().unwrap();
            for _ in 0..n {
                inner.fail_next.push_back(reason.clone());
            }
        }

        /// Makes every apply of one entity fail at the item level.
        pub fn fail_entity(&self, id: EntityId) {
            self.inner.lock().unwrap().failing_entities.insert(id);
        }

        /// Makes reads of one entity type fail.
        pub fn fail_reads(&self, entity_type: EntityType) {
            self.inner.lock().unwrap().read_failures.insert(entity_type);
        }

        /// Number of bulk apply calls made so far.
        pub fn apply_calls(&self) -> usize {
            self.inner.lock().unwrap().apply_calls
        }

        /// Returns a local record, if present.
        pub fn local_record(&self, entity_type: EntityType, id: &EntityId) -> Option<EntityRecord> {
            self.inner
                .lock()
                .unwrap()
                .local
                .get(&entity_type)
                .and_then(|m| m.get(id))
                .cloned()
        }

        /// Returns a remote record, if present.
        pub fn remote_record(&self, entity_type: EntityType, id: &EntityId) -> Option<EntityRecord> {
            self.inner
                .lock()
                .unwrap()
                .remote
                .get(&entity_type)
                .and_then(|m| m.get(id))
                .cloned()
        }

        fn take_scripted_failure(inner: &mut Inner) -> Option<String> {
            inner.apply_calls += 1;
            inner.fail_next.pop_front()
        }

        fn apply_records(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(reason) = Self::take_scripted_failure(&mut inner) {
                return Err(crate::error::StorageError::Network(reason));
            }
            let mut outcomes = Vec::with_capacity(records.len());
            for record in records {
                if inner.failing_entities.contains(&record.id) {
                    outcomes.push(ItemOutcome::failed(record.id.clone(), "rejected by server"));
                    continue;
                }
                inner.remote_version_counter += 1;
                let version = inner.remote_version_counter;
                let map = inner.remote.entry(record.entity_type()).or_default();
                map.insert(record.id.clone(), record.clone().with_version(version));
                outcomes.push(ItemOutcome::ok(record.id.clone(), version));
            }
            Ok(outcomes)
        }
    }

    #[async_trait]
    impl EntityStoreAdapter for MemoryAdapter {
        async fn local_entities(
            &self,
            entity_type: EntityType,
        ) -> StorageResult<Vec<EntityRecord>> {
            let inner = self.inner.lock().unwrap();
            if inner.read_failures.contains(&entity_type) {
                return Err(crate::error::StorageError::Database(format!(
                    "read failed for {entity_type}"
                )));
            }
            Ok(inner
                .local
                .get(&entity_type)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default())
        }

        async fn remote_entities(
            &self,
            entity_type: EntityType,
            since_version: u64,
        ) -> StorageResult<Vec<EntityRecord>> {
            let inner = self.inner.lock().unwrap();
            if inner.read_failures.contains(&entity_type) {
                return Err(crate::error::StorageError::Network(format!(
                    "read failed for {entity_type}"
                )));
            }
            Ok(inner
                .remote
                .get(&entity_type)
                .map(|m| {
                    m.values()
                        .filter(|r| r.version > since_version)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn apply_create(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
            self.apply_records(records)
        }

        async fn apply_update(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
            self.apply_records(records)
        }

        async fn apply_delete(
            &self,
            entity_type: EntityType,
            ids: &[EntityId],
        ) -> StorageResult<Vec<ItemOutcome>> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(reason) = Self::take_scripted_failure(&mut inner) {
                return Err(crate::error::StorageError::Network(reason));
            }
            let mut outcomes = Vec::with_capacity(ids.len());
            for id in ids {
                if inner.failing_entities.contains(id) {
                    outcomes.push(ItemOutcome::failed(id.clone(), "rejected by server"));
                    continue;
                }
                if let Some(map) = inner.remote.get_mut(&entity_type) {
                    map.remove(id);
                }
                outcomes.push(ItemOutcome::ok(id.clone(), 0));
            }
            Ok(outcomes)
        }

        async fn save_local(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
            let mut inner = self.inner.lock().unwrap();
            let mut outcomes = Vec::with_capacity(records.len());
            for record in records {
                inner
                    .local
                    .entry(record.entity_type())
                    .or_default()
                    .insert(record.id.clone(), record.clone());
                outcomes.push(ItemOutcome::ok(record.id.clone(), record.version));
            }
            Ok(outcomes)
        }

        async fn delete_local(
            &self,
            entity_type: EntityType,
            ids: &[EntityId],
        ) -> StorageResult<Vec<ItemOutcome>> {
            let mut inner = self.inner.lock().unwrap();
            let mut outcomes = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(map) = inner.local.get_mut(&entity_type) {
                    map.remove(id);
                }
                outcomes.push(ItemOutcome::ok(id.clone(), 0));
            }
            Ok(outcomes)
        }

        async fn mark_synced(
            &self,
            entity_type: EntityType,
            ids: &[EntityId],
        ) -> StorageResult<()> {
            let mut inner = self.inner.lock().unwrap();
            for id in ids {
                inner.pending.remove(&(entity_type, id.clone()));
            }
            Ok(())
        }

        async fn last_sync_version(&self, scope: &UserScope) -> StorageResult<u64> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .sync_versions
                .get(scope)
                .copied()
                .unwrap_or(0))
        }

        async fn set_last_sync_version(
            &self,
            scope: &UserScope,
            version: u64,
        ) -> StorageResult<()> {
            self.inner
                .lock()
                .unwrap()
                .sync_versions
                .insert(scope.clone(), version);
            Ok(())
        }
    }
}
