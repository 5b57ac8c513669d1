use cardbox_diagnostics::{
    DiagnosticsConfig, DiagnosticsEngine, IssueSeverity, RiskLevel, SystemStats,
};
use cardbox_types::{
    ConflictSeverity, ConflictState, ConflictStatus, ConflictType, EntityPayload, EntityRecord,
    EntityType,
};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

fn make_record(id: &str, version: u64) -> EntityRecord {
    EntityRecord::new(
        id,
        EntityPayload::Tag {
            name: "urgent".to_string(),
            color: "#ff0000".to_string(),
        },
    )
    .with_version(version)
}

fn make_conflict(entity_id: &str) -> ConflictState {
    ConflictState::new(
        EntityType::Tag,
        entity_id.into(),
        ConflictType::Content,
        ConflictSeverity::Medium,
        Some(make_record(entity_id, 2)),
        Some(make_record(entity_id, 3)),
        3,
    )
}

fn aged(minutes: i64) -> ConflictState {
    let mut conflict = make_conflict("t1");
    conflict.detected_at = Utc::now() - Duration::minutes(minutes);
    conflict.status_changed_at = conflict.detected_at;
    conflict
}

fn engine() -> DiagnosticsEngine {
    DiagnosticsEngine::new(DiagnosticsConfig::default())
}

// ── Stale conflict rule ──────────────────────────────────────────

#[test]
fn fresh_conflict_is_healthy() {
    let health = engine().conflict_health(&make_conflict("t1"));
    assert_eq!(health.score, 100);
    assert_eq!(health.risk, RiskLevel::Low);
    assert!(health.issues.is_empty());
}

#[test]
fn pending_past_warning_threshold_warns() {
    let health = engine().conflict_health(&aged(6));
    assert_eq!(health.issues.len(), 1);
    assert_eq!(health.issues[0].severity, IssueSeverity::Warning);
    assert_eq!(health.score, 90);
}

#[test]
fn pending_eleven_minutes_yields_exactly_one_critical_stale_issue() {
    let conflict = aged(11);
    let results = engine().run_full_diagnostic(
        std::slice::from_ref(&conflict),
        &SystemStats::default(),
    );

    let stale: Vec<_> = results
        .iter()
        .filter(|r| r.description.contains("stale"))
        .collect();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].severity, IssueSeverity::Critical);
    assert_eq!(stale[0].conflict_id, Some(conflict.id));
    // Critical only, never critical plus warning for the same age.
    assert!(!results
        .iter()
        .any(|r| r.severity == IssueSeverity::Warning));
}

#[test]
fn terminal_conflicts_never_go_stale() {
    let mut conflict = aged(60);
    conflict.status = ConflictStatus::Resolved;
    let health = engine().conflict_health(&conflict);
    assert!(health.issues.is_empty());
}

// ── Retry rule ───────────────────────────────────────────────────

#[test]
fn exhausted_retries_are_an_error() {
    let mut conflict = make_conflict("t1");
    conflict.retry_count = 3;
    let health = engine().conflict_health(&conflict);
    assert_eq!(health.issues.len(), 1);
    assert_eq!(health.issues[0].severity, IssueSeverity::Error);
    assert_eq!(health.score, 80);
}

// ── Resolution timeout rule ──────────────────────────────────────

#[test]
fn long_running_resolution_warns() {
    let mut conflict = aged(5);
    conflict.status = ConflictStatus::Resolving;
    let health = engine().conflict_health(&conflict);
    // Past both the resolution timeout and the stale warning threshold.
    assert!(health
        .issues
        .iter()
        .any(|i| i.description.contains("resolution")));
}

#[test]
fn resolution_timeout_counts_only_time_spent_resolving() {
    // Idled in pending for ten minutes, then entered resolving just now.
    let mut conflict = aged(10);
    conflict.status = ConflictStatus::Resolving;
    conflict.status_changed_at = Utc::now();

    let health = engine().conflict_health(&conflict);
    assert!(!health
        .issues
        .iter()
        .any(|i| i.description.contains("resolution")));
    // The stale rule still sees the full age.
    assert!(health
        .issues
        .iter()
        .any(|i| i.severity == IssueSeverity::Critical));
}

// ── Inconsistent state rule ──────────────────────────────────────

#[test]
fn resolved_with_local_ahead_of_remote_warns() {
    let mut conflict = make_conflict("t1");
    conflict.status = ConflictStatus::Resolved;
    conflict.local_version = 9;
    conflict.remote_version = 3;
    let health = engine().conflict_health(&conflict);
    assert_eq!(health.issues.len(), 1);
    assert_eq!(health.issues[0].severity, IssueSeverity::Warning);
}

// ── Scoring and risk ─────────────────────────────────────────────

#[test]
fn penalties_stack_across_rules() {
    let mut conflict = aged(60);
    conflict.retry_count = 5;
    conflict.status = ConflictStatus::Resolving;
    let health = engine().conflict_health(&conflict);
    assert!(health.score <= 100);
    // -30 stale, -20 retries, -10 resolution timeout.
    assert_eq!(health.score, 40);
    assert_eq!(health.risk, RiskLevel::High);
}

#[test]
fn risk_buckets() {
    assert_eq!(RiskLevel::from_score(0), RiskLevel::Critical);
    assert_eq!(RiskLevel::from_score(29), RiskLevel::Critical);
    assert_eq!(RiskLevel::from_score(30), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(49), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(50), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(69), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(70), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(100), RiskLevel::Low);
}

// ── Alert threshold ──────────────────────────────────────────────

#[test]
fn alerting_uses_an_ordered_comparison() {
    let engine = DiagnosticsEngine::new(DiagnosticsConfig {
        alert_threshold: IssueSeverity::Error,
        ..DiagnosticsConfig::default()
    });
    // Severities above the threshold alert too, not just the exact match.
    assert!(engine.should_alert(IssueSeverity::Error));
    assert!(engine.should_alert(IssueSeverity::Critical));
    assert!(!engine.should_alert(IssueSeverity::Warning));
}

// ── System checks ────────────────────────────────────────────────

#[test]
fn high_resolution_failure_rate_is_flagged() {
    let mut failed_a = make_conflict("t1");
    failed_a.status = ConflictStatus::Failed;
    let mut failed_b = make_conflict("t2");
    failed_b.status = ConflictStatus::Failed;
    let mut resolved = make_conflict("t3");
    resolved.status = ConflictStatus::Resolved;

    let results = engine().run_full_diagnostic(
        &[failed_a, failed_b, resolved],
        &SystemStats::default(),
    );
    let system: Vec<_> = results.iter().filter(|r| r.conflict_id.is_none()).collect();
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].severity, IssueSeverity::Error);
}

#[test]
fn persistence_failures_are_flagged() {
    let stats = SystemStats {
        persist_attempts: 10,
        persist_failures: 3,
    };
    let results = engine().run_full_diagnostic(&[], &stats);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].severity, IssueSeverity::Warning);
    assert!(results[0].conflict_id.is_none());
}

#[test]
fn healthy_system_produces_no_results() {
    let stats = SystemStats {
        persist_attempts: 100,
        persist_failures: 0,
    };
    assert!(engine()
        .run_full_diagnostic(&[make_conflict("t1")], &stats)
        .is_empty());
}

// ── Health report ────────────────────────────────────────────────

#[test]
fn empty_state_reports_full_health() {
    let report = engine().health_report(&[], &SystemStats::default());
    assert_eq!(report.overall_health, 100);
    assert_eq!(report.risk, RiskLevel::Low);
    assert!(report.recommendations.is_empty());
}

#[test]
fn report_averages_scores_and_collects_recommendations() {
    let healthy = make_conflict("t1");
    let stale = aged(11);

    let report = engine().health_report(&[healthy, stale], &SystemStats::default());
    // (100 + 70) / 2
    assert_eq!(report.overall_health, 85);
    assert!(!report.recommendations.is_empty());
}

// ── Custom rules ─────────────────────────────────────────────────

#[test]
fn registered_rules_run_alongside_built_ins() {
    let mut engine = engine();
    engine.register_rule("always_warn", |_, _, _| {
        vec![cardbox_diagnostics::DiagnosticIssue::new(
            IssueSeverity::Warning,
            "synthetic issue",
            "ignore",
        )]
    });

    let health = engine.conflict_health(&make_conflict("t1"));
    assert_eq!(health.issues.len(), 1);
    assert_eq!(health.score, 90);
}
