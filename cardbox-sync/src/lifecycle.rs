//! Conflict lifecycle management.
//!
//! The manager owns every conflict record for its whole life: it admits
//! new conflicts from the detector, validates status transitions against
//! the state machine, serializes concurrent updates per conflict id, and
//! writes each transition to the durable store when persistence is
//! enabled. Persistence failures are counted and surfaced through
//! diagnostics; they never block the in-memory transition.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use cardbox_store::{ConflictStore, EntityStoreAdapter};
use cardbox_types::{
    ConflictId, ConflictState, ConflictStatus, EntityId, EntityPayload, EntityRecord,
    EntityType, Resolution, ResolutionStrategy,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Counters for durable-write health, read by diagnostics.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    pub attempts: u64,
    pub failures: u64,
}

/// Owns the conflict state machine and its persistence.
pub struct ConflictManager {
    conflicts: RwLock<HashMap<ConflictId, ConflictState>>,
    /// Per-conflict locks so concurrent updates for the same id serialize.
    id_locks: Mutex<HashMap<ConflictId, Arc<tokio::sync::Mutex<()>>>>,
    store: Option<Arc<ConflictStore>>,
    persistence_enabled: bool,
    persist_attempts: AtomicU64,
    persist_failures: AtomicU64,
}

impl ConflictManager {
    /// Creates a manager. Pass a store to persist transitions; without one
    /// (or with persistence disabled) state is memory-only.
    #[must_use]
    pub fn new(config: &SyncConfig, store: Option<Arc<ConflictStore>>) -> Self {
        Self {
            conflicts: RwLock::new(HashMap::new()),
            id_locks: Mutex::new(HashMap::new()),
            store,
            persistence_enabled: config.persistence_enabled,
            persist_attempts: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Loads previously persisted conflicts into memory (startup).
    pub async fn load_persisted(&self) -> SyncResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store
            .load_all()
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let count = persisted.len();
        let mut conflicts = self.conflicts.write().await;
        for conflict in persisted {
            conflicts.insert(conflict.id, conflict);
        }
        info!(count, "loaded persisted conflicts");
        Ok(count)
    }

    // ── Admission ────────────────────────────────────────────────

    /// Admits a newly detected conflict.
    ///
    /// At most one active conflict may exist per (entity type, entity id).
    /// When one already exists, the new detection is merged into it —
    /// snapshots and versions refresh, the existing id and status are kept
    /// — so repeated detection cycles stay idempotent.
    pub async fn create_conflict(&self, conflict: ConflictState) -> SyncResult<ConflictId> {
        let mut conflicts = self.conflicts.write().await;

        let existing_id = conflicts
            .values()
            .find(|c| {
                c.is_active()
                    && c.entity_type == conflict.entity_type
                    && c.entity_id == conflict.entity_id
            })
            .map(|c| c.id);

        let id = match existing_id {
            Some(id) => {
                let existing = conflicts.get_mut(&id).ok_or(SyncError::ConflictNotFound(id))?;
                debug!(conflict_id = %id, "merging repeated detection into active conflict");
                existing.local_data = conflict.local_data;
                existing.remote_data = conflict.remote_data;
                existing.local_version = conflict.local_version;
                existing.remote_version = conflict.remote_version;
                existing.local_timestamp = conflict.local_timestamp;
                existing.remote_timestamp = conflict.remote_timestamp;
                existing.severity = existing.severity.max(conflict.severity);
                id
            }
            None => {
                let id = conflict.id;
                info!(
                    conflict_id = %id,
                    entity_type = %conflict.entity_type,
                    entity_id = %conflict.entity_id,
                    "conflict admitted"
                );
                conflicts.insert(id, conflict);
                id
            }
        };

        if let Some(c) = conflicts.get_mut(&id) {
            self.persist(c);
        }
        Ok(id)
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Returns one conflict by id.
    pub async fn get_conflict(&self, id: &ConflictId) -> Option<ConflictState> {
        self.conflicts.read().await.get(id).cloned()
    }

    /// Returns all conflicts, active and terminal.
    pub async fn all_conflicts(&self) -> Vec<ConflictState> {
        let mut all: Vec<_> = self.conflicts.read().await.values().cloned().collect();
        all.sort_by_key(|c| c.detected_at);
        all
    }

    /// Returns conflicts still awaiting resolution.
    pub async fn pending_conflicts(&self) -> Vec<ConflictState> {
        let mut pending: Vec<_> = self
            .conflicts
            .read()
            .await
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.detected_at);
        pending
    }

    /// Entities whose operations are blocked by an active conflict.
    pub async fn blocked_entities(&self) -> Vec<(EntityType, EntityId)> {
        self.conflicts
            .read()
            .await
            .values()
            .filter(|c| c.is_active())
            .map(|c| (c.entity_type, c.entity_id.clone()))
            .collect()
    }

    /// Durable-write health counters.
    #[must_use]
    pub fn persistence_stats(&self) -> PersistenceStats {
        PersistenceStats {
            attempts: self.persist_attempts.load(Ordering::Relaxed),
            failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Requests a status transition, validating it against the state
    /// machine. Any transition outside the graph is rejected and leaves
    /// the status unchanged.
    pub async fn update_state(&self, id: &ConflictId, next: ConflictStatus) -> SyncResult<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let mut conflicts = self.conflicts.write().await;
        let conflict = conflicts
            .get_mut(id)
            .ok_or(SyncError::ConflictNotFound(*id))?;

        Self::transition(conflict, next)?;
        self.persist(conflict);
        Ok(())
    }

    /// Resolves a conflict with the given strategy.
    ///
    /// Walks the state machine forward (pending → detecting → resolving),
    /// applies the winning record to both stores, and lands on `resolved`
    /// or `failed`. A failed attempt with retries remaining leaves the
    /// conflict in `resolving` so a later call can continue; exhausting
    /// `max_retries` forces the terminal `failed` state.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        custom_data: Option<EntityRecord>,
        adapter: &Arc<dyn EntityStoreAdapter>,
    ) -> SyncResult<Resolution> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        // Walk into `resolving`, validating each hop.
        let (plan, reasoning) = {
            let mut conflicts = self.conflicts.write().await;
            let conflict = conflicts
                .get_mut(id)
                .ok_or(SyncError::ConflictNotFound(*id))?;

            if conflict.retry_count >= conflict.max_retries {
                Self::force_failed(conflict, strategy, "retries exhausted");
                self.persist(conflict);
                return Err(SyncError::RetriesExhausted(*id));
            }

            match conflict.status {
                ConflictStatus::Pending => {
                    Self::transition(conflict, ConflictStatus::Detecting)?;
                    self.persist(conflict);
                    Self::transition(conflict, ConflictStatus::Resolving)?;
                    self.persist(conflict);
                }
                // A previous attempt failed with retries remaining.
                ConflictStatus::Resolving => {}
                ConflictStatus::Detecting => {
                    Self::transition(conflict, ConflictStatus::Resolving)?;
                    self.persist(conflict);
                }
                status => {
                    return Err(SyncError::InvalidTransition {
                        conflict_id: *id,
                        from: status,
                        to: ConflictStatus::Resolving,
                    });
                }
            }

            Self::plan_resolution(conflict, strategy, custom_data)?
        };

        // Apply outside the map lock; only the per-id lock is held.
        let apply_result = Self::apply_resolution(&plan, adapter).await;

        let mut conflicts = self.conflicts.write().await;
        let conflict = conflicts
            .get_mut(id)
            .ok_or(SyncError::ConflictNotFound(*id))?;

        match apply_result {
            Ok(()) => {
                Self::transition(conflict, ConflictStatus::Resolved)?;
                let resolution = Resolution {
                    strategy,
                    success: true,
                    reasoning,
                    resolved_at: Utc::now(),
                };
                conflict.resolution = Some(resolution.clone());
                self.persist(conflict);
                info!(conflict_id = %id, strategy = %strategy, "conflict resolved");
                Ok(resolution)
            }
            Err(e) => {
                conflict.retry_count += 1;
                if conflict.retry_count >= conflict.max_retries {
                    Self::force_failed(conflict, strategy, &format!("apply failed: {e}"));
                    self.persist(conflict);
                    error!(conflict_id = %id, "conflict resolution failed permanently: {e}");
                    Err(SyncError::RetriesExhausted(*id))
                } else {
                    self.persist(conflict);
                    warn!(
                        conflict_id = %id,
                        retry_count = conflict.retry_count,
                        "conflict resolution attempt failed: {e}"
                    );
                    Err(e)
                }
            }
        }
    }

    /// Writes every in-memory conflict to the durable store.
    /// Returns how many writes failed.
    pub async fn persist_all(&self) -> usize {
        let mut conflicts = self.conflicts.write().await;
        let mut failures = 0;
        for conflict in conflicts.values_mut() {
            let before = self.persist_failures.load(Ordering::Relaxed);
            self.persist(conflict);
            if self.persist_failures.load(Ordering::Relaxed) > before {
                failures += 1;
            }
        }
        failures
    }

    /// Removes terminal conflicts older than the retention window from
    /// memory and the durable store. Returns how many were removed.
    pub async fn cleanup_resolved(&self, retention: std::time::Duration) -> SyncResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| SyncError::Validation(format!("bad retention window: {e}")))?;

        let mut conflicts = self.conflicts.write().await;
        let stale: Vec<ConflictId> = conflicts
            .values()
            .filter(|c| !c.is_active() && c.detected_at < cutoff)
            .map(|c| c.id)
            .collect();
        for id in &stale {
            conflicts.remove(id);
            self.id_locks.lock().unwrap().remove(id);
        }
        drop(conflicts);

        if let Some(store) = &self.store {
            store
                .delete_terminal_before(cutoff)
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "cleaned up terminal conflicts");
        }
        Ok(stale.len())
    }

    // ── Internals ────────────────────────────────────────────────

    fn id_lock(&self, id: &ConflictId) -> Arc<tokio::sync::Mutex<()>> {
        self.id_locks
            .lock()
            .unwrap()
            .entry(*id)
            .or_default()
            .clone()
    }

    /// Applies a validated transition and stamps resolution time on exit
    /// from `resolving`.
    fn transition(conflict: &mut ConflictState, next: ConflictStatus) -> SyncResult<()> {
        if !conflict.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                conflict_id: conflict.id,
                from: conflict.status,
                to: next,
            });
        }
        if conflict.status == ConflictStatus::Resolving && next.is_terminal() {
            let elapsed = Utc::now() - conflict.detected_at;
            conflict.resolution_time_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        }
        debug!(
            conflict_id = %conflict.id,
            from = %conflict.status,
            to = %next,
            "conflict transition"
        );
        conflict.status = next;
        conflict.status_changed_at = Utc::now();
        Ok(())
    }

    /// Forces the terminal failed state. Retry exhaustion is the one case
    /// allowed to bypass the transition graph.
    fn force_failed(conflict: &mut ConflictState, strategy: ResolutionStrategy, reason: &str) {
        if conflict.status == ConflictStatus::Resolving {
            let elapsed = Utc::now() - conflict.detected_at;
            conflict.resolution_time_ms = Some(elapsed.num_milliseconds().max(0) as u64);
        }
        conflict.status = ConflictStatus::Failed;
        conflict.status_changed_at = Utc::now();
        conflict.resolution = Some(Resolution {
            strategy,
            success: false,
            reasoning: reason.to_string(),
            resolved_at: Utc::now(),
        });
    }

    /// Decides what record (if any) wins and on which sides it lands.
    fn plan_resolution(
        conflict: &ConflictState,
        strategy: ResolutionStrategy,
        custom_data: Option<EntityRecord>,
    ) -> SyncResult<(ResolutionPlan, String)> {
        let resolution_err = |detail: &str| SyncError::Resolution {
            entity_type: conflict.entity_type,
            entity_id: conflict.entity_id.clone(),
            detail: detail.to_string(),
        };

        let plan = match strategy {
            ResolutionStrategy::LocalWins => match &conflict.local_data {
                Some(record) => ResolutionPlan::Write(record.clone()),
                // Local side deleted: the delete wins.
                None => ResolutionPlan::Delete(conflict.entity_type, conflict.entity_id.clone()),
            },
            ResolutionStrategy::RemoteWins => match &conflict.remote_data {
                Some(record) => ResolutionPlan::Write(record.clone()),
                None => ResolutionPlan::Delete(conflict.entity_type, conflict.entity_id.clone()),
            },
            ResolutionStrategy::Merge => {
                let (Some(local), Some(remote)) = (&conflict.local_data, &conflict.remote_data)
                else {
                    return Err(resolution_err("merge needs both snapshots"));
                };
                ResolutionPlan::Write(merge_records(local, remote)?)
            }
            ResolutionStrategy::Manual => match custom_data {
                Some(record) => ResolutionPlan::Write(record),
                None => return Err(resolution_err("manual resolution needs a chosen record")),
            },
        };

        let reasoning = match &plan {
            ResolutionPlan::Write(_) => format!("{strategy}: applied winning record to both sides"),
            ResolutionPlan::Delete(..) => format!("{strategy}: applied delete to both sides"),
        };
        Ok((plan, reasoning))
    }

    /// Applies the winning outcome to both replicas.
    async fn apply_resolution(
        plan: &ResolutionPlan,
        adapter: &Arc<dyn EntityStoreAdapter>,
    ) -> SyncResult<()> {
        match plan {
            ResolutionPlan::Write(record) => {
                let records = std::slice::from_ref(record);
                check_outcomes(adapter.apply_update(records).await?)?;
                check_outcomes(adapter.save_local(records).await?)?;
            }
            ResolutionPlan::Delete(entity_type, entity_id) => {
                let ids = std::slice::from_ref(entity_id);
                check_outcomes(adapter.apply_delete(*entity_type, ids).await?)?;
                check_outcomes(adapter.delete_local(*entity_type, ids).await?)?;
            }
        }
        Ok(())
    }

    /// Counts a durable write; failures never block the in-memory state.
    fn persist(&self, conflict: &mut ConflictState) {
        if !self.persistence_enabled {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        self.persist_attempts.fetch_add(1, Ordering::Relaxed);
        match store.save(conflict) {
            Ok(()) => conflict.persisted = true,
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(conflict_id = %conflict.id, "failed to persist conflict: {e}");
            }
        }
    }
}

/// What a resolution writes.
enum ResolutionPlan {
    Write(EntityRecord),
    Delete(EntityType, EntityId),
}

fn check_outcomes(outcomes: Vec<cardbox_store::ItemOutcome>) -> SyncResult<()> {
    for outcome in outcomes {
        if let Err(reason) = outcome.result {
            return Err(SyncError::Server(format!(
                "resolution rejected for {}: {reason}",
                outcome.entity_id
            )));
        }
    }
    Ok(())
}

/// Field-level merge of two diverged records.
///
/// The higher-versioned record is the base; every comparable field where
/// the sides disagree takes the value from the more recently updated side.
/// The merged record carries the higher version so a subsequent detection
/// pass sees it as dominating both inputs.
pub fn merge_records(local: &EntityRecord, remote: &EntityRecord) -> SyncResult<EntityRecord> {
    let base_is_remote = remote.version >= local.version;
    let (base, other) = if base_is_remote {
        (remote, local)
    } else {
        (local, remote)
    };
    let newer_is_local = local.updated_at >= remote.updated_at;

    let mut merged = serde_json::to_value(&base.payload)?;
    let other_value = serde_json::to_value(&other.payload)?;

    if let (Some(merged_map), Some(other_map)) = (merged.as_object_mut(), other_value.as_object())
    {
        for field in cardbox_types::comparable_fields(base.entity_type()) {
            let base_val = merged_map.get(*field);
            let other_val = other_map.get(*field);
            if base_val == other_val {
                continue;
            }
            // Take the other side's value when it was edited more
            // recently than the base side.
            let take_other = base_is_remote == newer_is_local;
            if take_other {
                if let Some(v) = other_val {
                    merged_map.insert((*field).to_string(), v.clone());
                }
            }
        }
    }

    let payload: EntityPayload = serde_json::from_value(merged)?;
    Ok(EntityRecord {
        id: base.id.clone(),
        version: base.version.max(other.version),
        updated_at: Utc::now(),
        payload,
    })
}
