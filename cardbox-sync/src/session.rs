//! Session orchestration — one end-to-end run of the sync pipeline.
//!
//! The engine is constructed once at startup and wired explicitly: auth
//! and the store adapter come in through the constructor, conflicts flow
//! out through the lifecycle manager, and UI layers subscribe to the
//! typed event channel. At most one session runs per replica at a time;
//! `try_sync` reports `AlreadyRunning` as a value, never as a panic or
//! an error.

use crate::batch::BatchScheduler;
use crate::config::SyncConfig;
use crate::conflict_detect::ConflictDetector;
use crate::detector::ChangeDetector;
use crate::diff::EntityDiff;
use crate::error::SyncResult;
use crate::events::{EventSender, SyncEvent};
use crate::executor::{BatchExecutor, SessionIssue};
use crate::lifecycle::ConflictManager;
use crate::operation::{OperationBuilder, SourceSide, SyncOperation};
use cardbox_store::{AuthProvider, ConflictStore, EntityStoreAdapter};
use cardbox_types::{
    ConflictId, ConflictState, EntityId, EntityRecord, EntityType, ResolutionStrategy,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Structured result of one sync session.
///
/// A session always returns a report, even on partial failure; only the
/// already-running guard and a missing user scope short-circuit earlier.
#[derive(Debug, Default)]
pub struct SessionReport {
    /// Whether every dispatched operation landed.
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    /// Operations never dispatched (cancellation).
    pub skipped_count: usize,
    /// Conflicts recorded during this session.
    pub conflicts: Vec<ConflictState>,
    /// Recoverable errors accumulated across the session.
    pub errors: Vec<SessionIssue>,
    pub duration: Duration,
    pub bytes_transferred: usize,
}

impl SessionReport {
    fn empty_success(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            ..Default::default()
        }
    }
}

/// Outcome of asking the engine to sync.
#[derive(Debug)]
pub enum SessionOutcome {
    /// A session is already in progress; nothing was started.
    AlreadyRunning,
    /// The session ran to (possibly partial) completion.
    Completed(SessionReport),
}

/// The sync engine — owns the pipeline components and the session guard.
pub struct SyncEngine {
    config: SyncConfig,
    adapter: Arc<dyn EntityStoreAdapter>,
    auth: Arc<dyn AuthProvider>,
    local_detector: ChangeDetector,
    remote_detector: ChangeDetector,
    conflict_detector: ConflictDetector,
    conflicts: Arc<ConflictManager>,
    scheduler: BatchScheduler,
    executor: BatchExecutor,
    events: EventSender,
    running: AtomicBool,
    current_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl SyncEngine {
    /// Creates an engine. Pass a conflict store to persist conflict state
    /// across restarts.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        adapter: Arc<dyn EntityStoreAdapter>,
        auth: Arc<dyn AuthProvider>,
        conflict_store: Option<Arc<ConflictStore>>,
    ) -> Self {
        let conflicts = Arc::new(ConflictManager::new(&config, conflict_store));
        Self {
            scheduler: BatchScheduler::new(&config),
            executor: BatchExecutor::new(config.clone()),
            conflict_detector: ConflictDetector::new(config.max_conflict_retries),
            local_detector: ChangeDetector::new(),
            remote_detector: ChangeDetector::new(),
            conflicts,
            adapter,
            auth,
            events: EventSender::disabled(),
            running: AtomicBool::new(false),
            current_cancel: std::sync::Mutex::new(None),
            config,
        }
    }

    /// Subscribes to sync events, replacing any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::Receiver<SyncEvent> {
        let (tx, rx) = EventSender::channel(self.config.event_queue_capacity);
        self.events = tx;
        rx
    }

    /// The lifecycle manager owning conflict state.
    #[must_use]
    pub fn conflict_manager(&self) -> &Arc<ConflictManager> {
        &self.conflicts
    }

    /// Loads persisted conflicts into memory (call once at startup).
    pub async fn load_persisted_conflicts(&self) -> SyncResult<usize> {
        self.conflicts.load_persisted().await
    }

    /// Cancels the session currently in flight, if any. Batches already
    /// dispatched run to completion; no new batches start.
    pub fn cancel_session(&self) {
        if let Some(token) = self.current_cancel.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    // ── Conflict resolution surface (UI layer) ───────────────────

    /// Conflicts awaiting resolution.
    pub async fn pending_conflicts(&self) -> Vec<ConflictState> {
        self.conflicts.pending_conflicts().await
    }

    /// Resolves a conflict with the given strategy; `custom_data` supplies
    /// the chosen record for manual resolution.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        custom_data: Option<EntityRecord>,
    ) -> SyncResult<()> {
        self.conflicts
            .resolve_conflict(id, strategy, custom_data, &self.adapter)
            .await?;
        Ok(())
    }

    // ── Session entry point ──────────────────────────────────────

    /// Runs one sync session unless one is already in flight.
    pub async fn try_sync(&self) -> SyncResult<SessionOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SessionOutcome::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let cancel = CancellationToken::new();
        *self.current_cancel.lock().unwrap() = Some(cancel.clone());

        let report = self.run_session(cancel).await?;
        *self.current_cancel.lock().unwrap() = None;
        Ok(SessionOutcome::Completed(report))
    }

    async fn run_session(&self, cancel: CancellationToken) -> SyncResult<SessionReport> {
        let started = Instant::now();

        // No signed-in user: sync is a no-op, not an error.
        let Some(scope) = self.auth.current_user_scope().await else {
            info!("no user scope; sync session skipped");
            return Ok(SessionReport::empty_success(started.elapsed()));
        };

        self.events.publish(SyncEvent::SessionStarted {
            scope: scope.clone(),
        });
        info!(%scope, "sync session started");

        let mut errors: Vec<SessionIssue> = Vec::new();

        let since = match self.adapter.last_sync_version(&scope).await {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to read last sync version, falling back to full pull: {e}");
                errors.push(SessionIssue::new("last_sync_version", e.to_string()));
                0
            }
        };

        // Change detection per entity type, concurrently; a failed read
        // for one type never drops diffs computed for the others.
        let detections = join_all(
            EntityType::ALL
                .iter()
                .map(|t| self.detect_for_type(*t, since)),
        )
        .await;

        let mut local_diffs: Vec<EntityDiff> = Vec::new();
        let mut remote_diffs: Vec<EntityDiff> = Vec::new();
        let mut remote_reads_complete = true;
        let mut max_remote_version = since;
        for detection in detections {
            match detection {
                Ok(outcome) => {
                    max_remote_version = max_remote_version.max(outcome.max_remote_version);
                    local_diffs.extend(outcome.local);
                    remote_diffs.extend(outcome.remote);
                }
                Err(issue) => {
                    remote_reads_complete = false;
                    errors.push(issue);
                }
            }
        }

        // Conflict detection over the overlapping diff streams.
        let detected = self.conflict_detector.detect(&local_diffs, &remote_diffs);
        let mut conflicts = Vec::new();
        for conflict in detected {
            let severity = conflict.severity;
            let entity_type = conflict.entity_type;
            let entity_id = conflict.entity_id.clone();
            match self.conflicts.create_conflict(conflict).await {
                Ok(id) => {
                    self.events.publish(SyncEvent::ConflictDetected {
                        conflict_id: id,
                        entity_type,
                        entity_id,
                        severity,
                    });
                    if let Some(state) = self.conflicts.get_conflict(&id).await {
                        conflicts.push(state);
                    }
                }
                Err(e) => errors.push(SessionIssue::new("conflict admission", e.to_string())),
            }
        }

        // Conflicted entities sit out this pass; everything else proceeds.
        let blocked: HashSet<(EntityType, EntityId)> =
            self.conflicts.blocked_entities().await.into_iter().collect();
        let operations = self.build_operations(local_diffs, remote_diffs, &blocked, &mut errors);

        let batches = self.scheduler.schedule(operations);
        let exec = self
            .executor
            .execute(batches, self.adapter.clone(), cancel, self.events.clone())
            .await;
        errors.extend(exec.issues);

        // Only advance the sync cursor when every remote read succeeded;
        // otherwise unseen remote changes could be skipped forever.
        if remote_reads_complete && max_remote_version > since {
            if let Err(e) = self
                .adapter
                .set_last_sync_version(&scope, max_remote_version)
                .await
            {
                errors.push(SessionIssue::new("set_last_sync_version", e.to_string()));
            }
        }

        // Retention: drop terminal conflicts older than the configured
        // window so the store does not grow without bound.
        if let Err(e) = self
            .conflicts
            .cleanup_resolved(self.config.conflict_retention)
            .await
        {
            errors.push(SessionIssue::new("conflict cleanup", e.to_string()));
        }

        let report = SessionReport {
            success: exec.failed_count == 0 && exec.skipped_count == 0 && errors.is_empty(),
            processed_count: exec.processed_count,
            failed_count: exec.failed_count,
            skipped_count: exec.skipped_count,
            conflicts,
            errors,
            duration: started.elapsed(),
            bytes_transferred: exec.bytes_transferred,
        };

        self.events.publish(SyncEvent::SessionFinished {
            success: report.success,
            processed: report.processed_count,
            failed: report.failed_count,
        });
        info!(
            success = report.success,
            processed = report.processed_count,
            failed = report.failed_count,
            conflicts = report.conflicts.len(),
            duration_ms = report.duration.as_millis() as u64,
            "sync session finished"
        );
        Ok(report)
    }

    /// Reads both replicas for one entity type and runs change detection.
    async fn detect_for_type(
        &self,
        entity_type: EntityType,
        since: u64,
    ) -> Result<TypeDetection, SessionIssue> {
        let local_records = self
            .adapter
            .local_entities(entity_type)
            .await
            .map_err(|e| SessionIssue::new(format!("local read {entity_type}"), e.to_string()))?;
        let remote_records = self
            .adapter
            .remote_entities(entity_type, since)
            .await
            .map_err(|e| SessionIssue::new(format!("remote read {entity_type}"), e.to_string()))?;

        let max_remote_version = remote_records.iter().map(|r| r.version).max().unwrap_or(0);

        let local = self.local_detector.detect(entity_type, &local_records).await;
        // A cursor-filtered remote read omits unchanged records; only a
        // full read (cursor 0) can witness remote deletions.
        let remote = if since > 0 {
            self.remote_detector
                .detect_incremental(entity_type, &remote_records)
                .await
        } else {
            self.remote_detector
                .detect(entity_type, &remote_records)
                .await
        };

        self.events.publish(SyncEvent::DiffsDetected {
            entity_type,
            local: local.len(),
            remote: remote.len(),
        });

        Ok(TypeDetection {
            local,
            remote,
            max_remote_version,
        })
    }

    /// Turns unblocked diffs into prioritized operations.
    ///
    /// A remote diff paired with a dominating local diff (local version
    /// >= remote version) is stale for this pass and dropped instead of
    /// clobbering the local change.
    fn build_operations(
        &self,
        local_diffs: Vec<EntityDiff>,
        remote_diffs: Vec<EntityDiff>,
        blocked: &HashSet<(EntityType, EntityId)>,
        errors: &mut Vec<SessionIssue>,
    ) -> Vec<SyncOperation> {
        let local_versions: HashMap<(EntityType, EntityId), u64> = local_diffs
            .iter()
            .map(|d| ((d.entity_type, d.entity_id.clone()), d.version))
            .collect();

        let mut operations = Vec::new();
        let mut push = |diff: &EntityDiff, source: SourceSide, errors: &mut Vec<SessionIssue>| {
            match OperationBuilder::build(diff, source) {
                Ok(op) => operations.push(op),
                Err(e) => errors.push(SessionIssue::new(
                    format!("operation build {}", diff.entity_id),
                    e.to_string(),
                )),
            }
        };

        for diff in &local_diffs {
            if blocked.contains(&(diff.entity_type, diff.entity_id.clone())) {
                continue;
            }
            push(diff, SourceSide::Local, errors);
        }

        for diff in &remote_diffs {
            let key = (diff.entity_type, diff.entity_id.clone());
            if blocked.contains(&key) {
                continue;
            }
            if let Some(local_version) = local_versions.get(&key) {
                if *local_version >= diff.version {
                    continue;
                }
            }
            push(diff, SourceSide::Remote, errors);
        }

        operations
    }
}

/// Diffs produced for one entity type.
struct TypeDetection {
    local: Vec<EntityDiff>,
    remote: Vec<EntityDiff>,
    max_remote_version: u64,
}

/// Clears the running flag when the session ends, even on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
