use async_trait::async_trait;
use cardbox_store::{
    mock::MemoryAdapter, EntityStoreAdapter, ItemOutcome, StorageResult, UserScope,
};
use cardbox_sync::{
    BatchExecutor, BatchScheduler, EntityDiff, EventSender, OperationBuilder, SourceSide,
    SyncConfig, SyncEvent,
};
use cardbox_types::{EntityId, EntityPayload, EntityRecord, EntityType};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn make_card(id: &str, title: &str) -> EntityRecord {
    EntityRecord::new(
        id,
        EntityPayload::Card {
            title: title.to_string(),
            body: String::new(),
            folder_id: None,
            tag_ids: vec![],
            starred: false,
        },
    )
}

fn make_folder(id: &str, name: &str) -> EntityRecord {
    EntityRecord::new(
        id,
        EntityPayload::Folder {
            name: name.to_string(),
            parent_id: None,
            position: 0,
        },
    )
}

/// Fast retries so tests never sleep for real.
fn test_config() -> SyncConfig {
    SyncConfig {
        retry_delays: vec![Duration::ZERO],
        max_batch_retries: 2,
        ..SyncConfig::default()
    }
}

fn local_create_batches(config: &SyncConfig, records: &[EntityRecord]) -> Vec<cardbox_sync::SyncBatch> {
    let ops = records
        .iter()
        .map(|r| OperationBuilder::build(&EntityDiff::create(r.clone()), SourceSide::Local).unwrap())
        .collect();
    BatchScheduler::new(config).schedule(ops)
}

#[tokio::test]
async fn successful_batch_lands_and_clears_pending() {
    let config = test_config();
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.mark_pending(EntityType::Card, "c1".into());
    adapter.mark_pending(EntityType::Card, "c2".into());

    let batches = local_create_batches(&config, &[make_card("c1", "one"), make_card("c2", "two")]);
    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 2);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.skipped_count, 0);
    assert!(report.bytes_transferred > 0);
    assert!(report.issues.is_empty());

    assert!(adapter.remote_record(EntityType::Card, &"c1".into()).is_some());
    assert!(!adapter.is_pending(EntityType::Card, &"c1".into()));
    assert!(!adapter.is_pending(EntityType::Card, &"c2".into()));
}

#[tokio::test]
async fn retryable_failure_is_retried_and_succeeds() {
    let config = test_config();
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.fail_next_applies(1, "connection reset");

    let batches = local_create_batches(&config, &[make_card("c1", "one")]);
    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 1);
    assert_eq!(report.failed_count, 0);
    // First attempt failed, second landed.
    assert_eq!(adapter.apply_calls(), 2);
}

#[tokio::test]
async fn exhausted_retries_fail_the_batch() {
    let config = SyncConfig {
        max_batch_retries: 1,
        ..test_config()
    };
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.fail_next_applies(10, "backend down");

    let batches = local_create_batches(&config, &[make_card("c1", "one"), make_card("c2", "two")]);
    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 0);
    assert_eq!(report.failed_count, 2);
    assert!(!report.issues.is_empty());
    // Initial attempt plus one retry.
    assert_eq!(adapter.apply_calls(), 2);
}

#[tokio::test]
async fn item_failures_split_the_batch_outcome() {
    let config = test_config();
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.fail_entity("c2".into());
    adapter.mark_pending(EntityType::Card, "c1".into());
    adapter.mark_pending(EntityType::Card, "c2".into());

    let batches = local_create_batches(&config, &[make_card("c1", "one"), make_card("c2", "two")]);
    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 1);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.issues.len(), 1);
    // Only the landed entity loses its pending flag.
    assert!(!adapter.is_pending(EntityType::Card, &"c1".into()));
    assert!(adapter.is_pending(EntityType::Card, &"c2".into()));
}

#[tokio::test]
async fn one_failing_batch_never_blocks_the_other() {
    // Serialize batches so the scripted failure hits the first one.
    let config = SyncConfig {
        max_batch_retries: 0,
        max_concurrent_batches: 1,
        ..test_config()
    };
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.fail_next_applies(1, "backend down");

    let card_op = OperationBuilder::build(
        &EntityDiff::create(make_card("c1", "one")),
        SourceSide::Local,
    )
    .unwrap();
    let folder_op = OperationBuilder::build(
        &EntityDiff::create(make_folder("f1", "inbox")),
        SourceSide::Local,
    )
    .unwrap();
    let batches = BatchScheduler::new(&config).schedule(vec![card_op, folder_op]);
    assert_eq!(batches.len(), 2);

    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 1);
    assert_eq!(report.failed_count, 1);
    assert!(adapter
        .remote_record(EntityType::Folder, &"f1".into())
        .is_some());
}

/// Delegating adapter whose `apply_create` never returns, so every
/// attempt runs into the per-attempt timeout.
struct HangingAdapter {
    inner: MemoryAdapter,
    attempts: AtomicUsize,
}

#[async_trait]
impl EntityStoreAdapter for HangingAdapter {
    async fn local_entities(&self, entity_type: EntityType) -> StorageResult<Vec<EntityRecord>> {
        self.inner.local_entities(entity_type).await
    }

    async fn remote_entities(
        &self,
        entity_type: EntityType,
        since_version: u64,
    ) -> StorageResult<Vec<EntityRecord>> {
        self.inner.remote_entities(entity_type, since_version).await
    }

    async fn apply_create(&self, _records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn apply_update(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
        self.inner.apply_update(records).await
    }

    async fn apply_delete(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> StorageResult<Vec<ItemOutcome>> {
        self.inner.apply_delete(entity_type, ids).await
    }

    async fn save_local(&self, records: &[EntityRecord]) -> StorageResult<Vec<ItemOutcome>> {
        self.inner.save_local(records).await
    }

    async fn delete_local(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> StorageResult<Vec<ItemOutcome>> {
        self.inner.delete_local(entity_type, ids).await
    }

    async fn mark_synced(&self, entity_type: EntityType, ids: &[EntityId]) -> StorageResult<()> {
        self.inner.mark_synced(entity_type, ids).await
    }

    async fn last_sync_version(&self, scope: &UserScope) -> StorageResult<u64> {
        self.inner.last_sync_version(scope).await
    }

    async fn set_last_sync_version(&self, scope: &UserScope, version: u64) -> StorageResult<()> {
        self.inner.set_last_sync_version(scope, version).await
    }
}

#[tokio::test]
async fn timed_out_attempts_retry_then_fail_the_batch() {
    let config = SyncConfig {
        operation_timeout: Duration::from_millis(50),
        max_batch_retries: 1,
        ..test_config()
    };
    let adapter = Arc::new(HangingAdapter {
        inner: MemoryAdapter::new(),
        attempts: AtomicUsize::new(0),
    });

    let batches = local_create_batches(&config, &[make_card("c1", "one")]);
    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 0);
    assert_eq!(report.failed_count, 1);
    // Each timed-out attempt goes through the same retry path as a
    // network failure: initial attempt plus one retry.
    assert_eq!(adapter.attempts.load(Ordering::SeqCst), 2);
    assert!(report
        .issues
        .iter()
        .any(|i| i.message.contains("timed out")));
}

#[tokio::test]
async fn cancellation_skips_undispatched_batches() {
    let config = test_config();
    let adapter = Arc::new(MemoryAdapter::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let batches = local_create_batches(&config, &[make_card("c1", "one"), make_card("c2", "two")]);
    let report = BatchExecutor::new(config)
        .execute(batches, adapter.clone(), cancel, EventSender::disabled())
        .await;

    assert_eq!(report.processed_count, 0);
    assert_eq!(report.skipped_count, 2);
    assert_eq!(adapter.apply_calls(), 0);
}

#[tokio::test]
async fn remote_sourced_operations_apply_locally() {
    let config = test_config();
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.insert_local(make_card("gone", "stale"));

    let save_op = OperationBuilder::build(
        &EntityDiff::create(make_card("c1", "from remote")),
        SourceSide::Remote,
    )
    .unwrap();
    let delete_op = OperationBuilder::build(
        &EntityDiff::delete(EntityType::Card, "gone".into(), 2),
        SourceSide::Remote,
    )
    .unwrap();
    let batches = BatchScheduler::new(&config).schedule(vec![save_op, delete_op]);

    let report = BatchExecutor::new(config)
        .execute(
            batches,
            adapter.clone(),
            CancellationToken::new(),
            EventSender::disabled(),
        )
        .await;

    assert_eq!(report.processed_count, 2);
    assert!(adapter.local_record(EntityType::Card, &"c1".into()).is_some());
    assert!(adapter.local_record(EntityType::Card, &"gone".into()).is_none());
    // Remote-sourced work touches no remote state.
    assert!(adapter.remote_record(EntityType::Card, &"c1".into()).is_none());
}

#[tokio::test]
async fn completion_and_failure_events_are_published() {
    let config = SyncConfig {
        max_batch_retries: 0,
        max_concurrent_batches: 1,
        ..test_config()
    };
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.fail_next_applies(1, "backend down");

    let card_op = OperationBuilder::build(
        &EntityDiff::create(make_card("c1", "one")),
        SourceSide::Local,
    )
    .unwrap();
    let folder_op = OperationBuilder::build(
        &EntityDiff::create(make_folder("f1", "inbox")),
        SourceSide::Local,
    )
    .unwrap();
    let batches = BatchScheduler::new(&config).schedule(vec![card_op, folder_op]);

    let (events, mut rx) = EventSender::channel(16);
    BatchExecutor::new(config)
        .execute(batches, adapter, CancellationToken::new(), events)
        .await;

    let mut completed = 0;
    let mut failed = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            SyncEvent::BatchCompleted { .. } => completed += 1,
            SyncEvent::BatchFailed { .. } => failed += 1,
            _ => {}
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(failed, 1);
}
