use cardbox_sync::{
    BatchScheduler, EntityDiff, OperationBuilder, Priority, SourceSide, SyncConfig,
};
use cardbox_types::{EntityPayload, EntityRecord, EntityType};
use pretty_assertions::assert_eq;

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

fn create_op(id: &str) -> cardbox_sync::SyncOperation {
    OperationBuilder::build(&EntityDiff::create(make_card(id, "title")), SourceSide::Local)
        .unwrap()
}

fn delete_op(id: &str) -> cardbox_sync::SyncOperation {
    OperationBuilder::build(
        &EntityDiff::delete(EntityType::Card, id.into(), 1),
        SourceSide::Local,
    )
    .unwrap()
}

// ── Packing ──────────────────────────────────────────────────────

#[test]
fn hundred_twenty_ops_pack_into_50_50_20() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    let ops: Vec<_> = (0..120).map(|i| create_op(&format!("c{i:03}"))).collect();

    let batches = scheduler.schedule(ops);
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
}

#[test]
fn empty_input_yields_no_batches() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    assert!(scheduler.schedule(Vec::new()).is_empty());
}

#[test]
fn batches_are_homogeneous() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    let mut ops = vec![create_op("c1"), create_op("c2")];
    ops.push(delete_op("c3"));
    ops.push(OperationBuilder::build(&EntityDiff::create(make_card("c4", "t")), SourceSide::Remote).unwrap());

    let batches = scheduler.schedule(ops);
    // creates/local, delete/local, create/remote.
    assert_eq!(batches.len(), 3);
    for batch in &batches {
        let op_kind = batch.operation().unwrap();
        let source = batch.source().unwrap();
        assert!(batch
            .operations
            .iter()
            .all(|op| op.op == op_kind && op.source == source));
    }
}

#[test]
fn byte_ceiling_closes_batches() {
    let one_op_bytes = create_op("c0").estimated_size();
    let config = SyncConfig {
        // Room for two operations, not three.
        max_batch_bytes: one_op_bytes * 2 + one_op_bytes / 2,
        ..SyncConfig::default()
    };
    let scheduler = BatchScheduler::new(&config);

    let ops: Vec<_> = (0..5).map(|i| create_op(&format!("c{i}"))).collect();
    let batches = scheduler.schedule(ops);

    assert_eq!(batches.len(), 3);
    for batch in &batches {
        assert!(batch.estimated_size_bytes <= config.max_batch_bytes);
    }
}

#[test]
fn oversized_operation_forms_singleton_batch() {
    let config = SyncConfig {
        max_batch_bytes: 64,
        ..SyncConfig::default()
    };
    let scheduler = BatchScheduler::new(&config);

    let huge = OperationBuilder::build(
        &EntityDiff::create(make_card("big", &"x".repeat(1024))),
        SourceSide::Local,
    )
    .unwrap();
    assert!(huge.estimated_size() > config.max_batch_bytes);

    let batches = scheduler.schedule(vec![create_op("c1"), huge, create_op("c2")]);

    let singleton = batches
        .iter()
        .find(|b| b.len() == 1 && b.operations[0].entity_id.as_str() == "big");
    assert!(singleton.is_some());
    // Nothing was dropped.
    let total: usize = batches.iter().map(|b| b.len()).sum();
    assert_eq!(total, 3);
}

// ── Priority ─────────────────────────────────────────────────────

#[test]
fn delete_batches_escalate_to_critical() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    let batches = scheduler.schedule(vec![delete_op("c1")]);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].priority, Priority::Critical);
}

#[test]
fn batches_order_by_descending_priority() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    let mut ops: Vec<_> = (0..3).map(|i| create_op(&format!("c{i}"))).collect();
    ops.push(delete_op("d1"));

    let batches = scheduler.schedule(ops);
    assert!(batches.len() >= 2);
    assert_eq!(batches[0].priority, Priority::Critical);
    for pair in batches.windows(2) {
        assert!(pair[0].priority >= pair[1].priority);
    }
}

#[test]
fn create_batch_priority_is_highest_member() {
    let scheduler = BatchScheduler::new(&SyncConfig::default());
    let batches = scheduler.schedule(vec![create_op("c1"), create_op("c2")]);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].priority, Priority::Normal);
    assert!(batches[0].processed_at.is_none());
    assert_eq!(batches[0].retry_count, 0);
}
