use cardbox_sync::{ConflictDetector, EntityDiff, FieldChange};
use cardbox_types::{ConflictSeverity, ConflictStatus, ConflictType, EntityPayload, EntityRecord, EntityType};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn make_card(id: &str, title: &str, version: u64) -> EntityRecord {
    EntityRecord::new(
        id,
        EntityPayload::Card {
            title: title.to_string(),
            body: "body".to_string(),
            folder_id: None,
            tag_ids: vec![],
            starred: false,
        },
    )
    .with_version(version)
}

fn make_folder(id: &str, name: &str, version: u64) -> EntityRecord {
    EntityRecord::new(
        id,
        EntityPayload::Folder {
            name: name.to_string(),
            parent_id: None,
            position: 0,
        },
    )
    .with_version(version)
}

fn field_change(field: &str, old: &str, new: &str) -> BTreeMap<String, FieldChange> {
    let mut fields = BTreeMap::new();
    fields.insert(
        field.to_string(),
        FieldChange {
            old_value: old.into(),
            new_value: new.into(),
        },
    );
    fields
}

// ── classify ─────────────────────────────────────────────────────

#[test]
fn diverging_title_edits_are_a_content_conflict() {
    // Local edits title A->B at version 1, remote edits A->C at version 2.
    let local = EntityDiff::update(make_card("card-1", "B", 1), field_change("title", "A", "B"));
    let remote = EntityDiff::update(make_card("card-1", "C", 2), field_change("title", "A", "C"));

    let (conflict_type, severity) = ConflictDetector::classify(&local, &remote).unwrap();
    assert_eq!(conflict_type, ConflictType::Content);
    assert_eq!(severity, ConflictSeverity::Medium);
}

#[test]
fn delete_versus_update_is_a_delete_conflict() {
    let local = EntityDiff::delete(EntityType::Folder, "folder-7".into(), 1);
    let remote = EntityDiff::update(
        make_folder("folder-7", "renamed", 2),
        field_change("name", "inbox", "renamed"),
    );

    let (conflict_type, severity) = ConflictDetector::classify(&local, &remote).unwrap();
    assert_eq!(conflict_type, ConflictType::Delete);
    assert_eq!(severity, ConflictSeverity::High);

    // Symmetric: remote delete against local update.
    let local = EntityDiff::update(
        make_folder("folder-7", "renamed", 1),
        field_change("name", "inbox", "renamed"),
    );
    let remote = EntityDiff::delete(EntityType::Folder, "folder-7".into(), 2);
    let (conflict_type, severity) = ConflictDetector::classify(&local, &remote).unwrap();
    assert_eq!(conflict_type, ConflictType::Delete);
    assert_eq!(severity, ConflictSeverity::High);
}

#[test]
fn both_sides_deleting_converges() {
    let local = EntityDiff::delete(EntityType::Card, "c1".into(), 1);
    let remote = EntityDiff::delete(EntityType::Card, "c1".into(), 2);
    assert!(ConflictDetector::classify(&local, &remote).is_none());
}

#[test]
fn dominating_local_version_suppresses_conflict() {
    let local = EntityDiff::update(make_card("c1", "B", 5), field_change("title", "A", "B"));
    let remote = EntityDiff::update(make_card("c1", "C", 3), field_change("title", "A", "C"));
    assert!(ConflictDetector::classify(&local, &remote).is_none());

    // Equal versions also count as dominated.
    let remote = EntityDiff::update(make_card("c1", "C", 5), field_change("title", "A", "C"));
    assert!(ConflictDetector::classify(&local, &remote).is_none());
}

#[test]
fn disjoint_field_sets_compose() {
    let local = EntityDiff::update(make_card("c1", "B", 1), field_change("title", "A", "B"));
    let remote = EntityDiff::update(make_card("c1", "A", 2), field_change("body", "x", "y"));
    assert!(ConflictDetector::classify(&local, &remote).is_none());
}

#[test]
fn overlapping_fields_with_agreeing_values_converge() {
    let local = EntityDiff::update(make_card("c1", "B", 1), field_change("title", "A", "B"));
    let remote = EntityDiff::update(make_card("c1", "B", 2), field_change("title", "A", "B"));
    assert!(ConflictDetector::classify(&local, &remote).is_none());
}

#[test]
fn classify_is_deterministic() {
    let local = EntityDiff::update(make_card("c1", "B", 1), field_change("title", "A", "B"));
    let remote = EntityDiff::update(make_card("c1", "C", 2), field_change("title", "A", "C"));

    let first = ConflictDetector::classify(&local, &remote);
    for _ in 0..10 {
        assert_eq!(ConflictDetector::classify(&local, &remote), first);
    }
}

// ── detect ───────────────────────────────────────────────────────

#[test]
fn detect_emits_pending_conflicts_with_diff_versions() {
    let detector = ConflictDetector::new(3);
    let local = vec![EntityDiff::update(
        make_card("card-1", "B", 1),
        field_change("title", "A", "B"),
    )];
    let remote = vec![EntityDiff::update(
        make_card("card-1", "C", 2),
        field_change("title", "A", "C"),
    )];

    let conflicts = detector.detect(&local, &remote);
    assert_eq!(conflicts.len(), 1);

    let conflict = &conflicts[0];
    assert_eq!(conflict.status, ConflictStatus::Pending);
    assert_eq!(conflict.conflict_type, ConflictType::Content);
    assert_eq!(conflict.severity, ConflictSeverity::Medium);
    assert_eq!(conflict.local_version, 1);
    assert_eq!(conflict.remote_version, 2);
    assert_eq!(conflict.max_retries, 3);
    assert!(conflict.local_data.is_some());
    assert!(conflict.remote_data.is_some());
}

#[test]
fn detect_ignores_entities_on_one_side_only() {
    let detector = ConflictDetector::new(3);
    let local = vec![EntityDiff::create(make_card("c1", "a", 1))];
    let remote = vec![EntityDiff::create(make_card("c2", "b", 1))];
    assert!(detector.detect(&local, &remote).is_empty());
}

#[test]
fn detect_matches_on_type_and_id() {
    // Same id under different entity types never pairs up.
    let detector = ConflictDetector::new(3);
    let local = vec![EntityDiff::delete(EntityType::Card, "x".into(), 1)];
    let remote = vec![EntityDiff::update(
        make_folder("x", "renamed", 2),
        field_change("name", "a", "renamed"),
    )];
    assert!(detector.detect(&local, &remote).is_empty());
}

#[test]
fn delete_conflict_keeps_surviving_snapshot_only() {
    let detector = ConflictDetector::new(3);
    let local = vec![EntityDiff::delete(EntityType::Folder, "folder-7".into(), 1)];
    let remote = vec![EntityDiff::update(
        make_folder("folder-7", "renamed", 2),
        field_change("name", "inbox", "renamed"),
    )];

    let conflicts = detector.detect(&local, &remote);
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].local_data.is_none());
    assert!(conflicts[0].remote_data.is_some());
    assert_eq!(conflicts[0].local_version, 1);
    assert_eq!(conflicts[0].remote_version, 2);
}
