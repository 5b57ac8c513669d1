//! Concurrency-bounded batch execution with retry and backoff.
//!
//! A counting semaphore caps how many batches are in flight; waiters are
//! served in FIFO order. Each batch dispatches as one grouped store call,
//! retries retryable failures on the configured backoff schedule, and
//! surfaces exhausted retries as recoverable errors without aborting the
//! rest of the session.

use crate::batch::SyncBatch;
use crate::config::SyncConfig;
use crate::diff::DiffOperation;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventSender, SyncEvent};
use crate::operation::SourceSide;
use cardbox_store::{EntityStoreAdapter, ItemOutcome};
use cardbox_types::{EntityId, EntityRecord};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One recoverable problem accumulated into the session result.
#[derive(Debug, Clone)]
pub struct SessionIssue {
    /// Where the problem occurred (batch id, entity type, ...).
    pub context: String,
    /// What went wrong.
    pub message: String,
}

impl SessionIssue {
    pub(crate) fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Aggregate outcome of executing a list of batches.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Operations applied successfully.
    pub processed_count: usize,
    /// Operations that failed (item rejections and exhausted batches).
    pub failed_count: usize,
    /// Operations never dispatched because the session was cancelled.
    pub skipped_count: usize,
    /// Estimated bytes moved for dispatched batches.
    pub bytes_transferred: usize,
    /// Recoverable errors, one per failing batch or item.
    pub issues: Vec<SessionIssue>,
}

impl ExecutionReport {
    fn absorb(&mut self, other: ExecutionReport) {
        self.processed_count += other.processed_count;
        self.failed_count += other.failed_count;
        self.skipped_count += other.skipped_count;
        self.bytes_transferred += other.bytes_transferred;
        self.issues.extend(other.issues);
    }
}

/// Executes batches under a bounded-concurrency limiter.
pub struct BatchExecutor {
    config: SyncConfig,
}

impl BatchExecutor {
    /// Creates an executor from the engine configuration.
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Runs all batches and returns the aggregate report.
    ///
    /// One failing batch never prevents unrelated batches from
    /// completing, and local bookkeeping for a successful batch is
    /// applied even when a later batch fails.
    pub async fn execute(
        &self,
        batches: Vec<SyncBatch>,
        adapter: Arc<dyn EntityStoreAdapter>,
        cancel: CancellationToken,
        events: EventSender,
    ) -> ExecutionReport {
        if batches.is_empty() {
            return ExecutionReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        info!(
            batches = batches.len(),
            concurrency = self.config.effective_concurrency(),
            "executing batch schedule"
        );

        let runs = batches.into_iter().map(|batch| {
            let semaphore = semaphore.clone();
            let adapter = adapter.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            async move {
                // Closed semaphore is unreachable; treat it as cancellation.
                let Ok(_permit) = semaphore.acquire().await else {
                    return Self::skipped(batch);
                };
                // Batches already dispatched run to completion, but no new
                // batch starts after cancellation.
                if cancel.is_cancelled() {
                    return Self::skipped(batch);
                }
                self.run_batch(batch, &adapter, &events).await
            }
        });

        let mut report = ExecutionReport::default();
        for partial in join_all(runs).await {
            report.absorb(partial);
        }
        report
    }

    fn skipped(batch: SyncBatch) -> ExecutionReport {
        debug!(batch_id = %batch.id, "batch skipped after cancellation");
        ExecutionReport {
            skipped_count: batch.len(),
            issues: vec![SessionIssue::new(
                format!("batch {}", batch.id),
                "skipped: session cancelled",
            )],
            ..Default::default()
        }
    }

    async fn run_batch(
        &self,
        mut batch: SyncBatch,
        adapter: &Arc<dyn EntityStoreAdapter>,
        events: &EventSender,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let mut attempt: u32 = 0;

        loop {
            let result = match timeout(
                self.config.operation_timeout,
                Self::dispatch(&batch, adapter.as_ref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            };

            match result {
                Ok(outcomes) => {
                    batch.processed_at = Some(Utc::now());
                    report.bytes_transferred += batch.estimated_size_bytes;
                    self.settle_outcomes(&batch, outcomes, adapter, &mut report)
                        .await;
                    events.publish(SyncEvent::BatchCompleted {
                        batch_id: batch.id,
                        processed: report.processed_count,
                    });
                    return report;
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_batch_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        batch_id = %batch.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "batch attempt failed, backing off: {err}"
                    );
                    attempt += 1;
                    batch.retry_count = attempt;
                    for op in &mut batch.operations {
                        op.retry_count = attempt;
                    }
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(batch_id = %batch.id, "batch failed permanently: {err}");
                    report.failed_count += batch.len();
                    report
                        .issues
                        .push(SessionIssue::new(format!("batch {}", batch.id), err.to_string()));
                    events.publish(SyncEvent::BatchFailed {
                        batch_id: batch.id,
                        error: err.to_string(),
                    });
                    return report;
                }
            }
        }
    }

    /// Issues the one grouped store call a batch maps to.
    async fn dispatch(
        batch: &SyncBatch,
        adapter: &dyn EntityStoreAdapter,
    ) -> SyncResult<Vec<ItemOutcome>> {
        let (Some(source), Some(entity_type), Some(op)) =
            (batch.source(), batch.entity_type(), batch.operation())
        else {
            return Ok(Vec::new());
        };

        let outcomes = match (source, op) {
            (SourceSide::Local, DiffOperation::Create) => {
                adapter.apply_create(&Self::records(batch)?).await?
            }
            (SourceSide::Local, DiffOperation::Update) => {
                adapter.apply_update(&Self::records(batch)?).await?
            }
            (SourceSide::Local, DiffOperation::Delete) => {
                adapter.apply_delete(entity_type, &Self::ids(batch)).await?
            }
            (SourceSide::Remote, DiffOperation::Create | DiffOperation::Update) => {
                adapter.save_local(&Self::records(batch)?).await?
            }
            (SourceSide::Remote, DiffOperation::Delete) => {
                adapter.delete_local(entity_type, &Self::ids(batch)).await?
            }
        };
        Ok(outcomes)
    }

    /// Splits per-item outcomes into processed/failed counts and clears
    /// local pending flags for entities a local-sourced batch landed.
    async fn settle_outcomes(
        &self,
        batch: &SyncBatch,
        outcomes: Vec<ItemOutcome>,
        adapter: &Arc<dyn EntityStoreAdapter>,
        report: &mut ExecutionReport,
    ) {
        let mut synced: Vec<EntityId> = Vec::new();
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => {
                    report.processed_count += 1;
                    synced.push(outcome.entity_id.clone());
                }
                Err(reason) => {
                    report.failed_count += 1;
                    report.issues.push(SessionIssue::new(
                        format!("entity {}", outcome.entity_id),
                        reason.clone(),
                    ));
                }
            }
        }

        if batch.source() == Some(SourceSide::Local) && !synced.is_empty() {
            if let Some(entity_type) = batch.entity_type() {
                if let Err(e) = adapter.mark_synced(entity_type, &synced).await {
                    // Bookkeeping failure is recoverable; the entities
                    // re-upload next session.
                    report.issues.push(SessionIssue::new(
                        format!("batch {}", batch.id),
                        format!("mark_synced failed: {e}"),
                    ));
                }
            }
        }
    }

    fn records(batch: &SyncBatch) -> SyncResult<Vec<EntityRecord>> {
        batch
            .operations
            .iter()
            .map(|op| {
                op.payload.record.clone().ok_or_else(|| {
                    SyncError::Validation(format!(
                        "{} operation for {} carries no record",
                        op.op, op.entity_id
                    ))
                })
            })
            .collect()
    }

    fn ids(batch: &SyncBatch) -> Vec<EntityId> {
        batch
            .operations
            .iter()
            .map(|op| op.entity_id.clone())
            .collect()
    }
}
