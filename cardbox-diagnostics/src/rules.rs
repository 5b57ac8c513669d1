//! Built-in diagnostic rules.
//!
//! A rule is an independent function over one conflict record; it may
//! return any number of issues and never mutates the conflict. New rules
//! register alongside the built-ins on the engine.

use crate::engine::DiagnosticsConfig;
use crate::report::{DiagnosticIssue, IssueSeverity};
use cardbox_types::{ConflictState, ConflictStatus};
use chrono::{DateTime, Utc};

/// Signature every rule implements.
pub type RuleFn = fn(&ConflictState, &DiagnosticsConfig, DateTime<Utc>) -> Vec<DiagnosticIssue>;

/// A named rule in the registry.
#[derive(Clone)]
pub struct DiagnosticRule {
    pub name: &'static str,
    pub run: RuleFn,
}

/// The rules every engine starts with.
pub fn built_in_rules() -> Vec<DiagnosticRule> {
    vec![
        DiagnosticRule {
            name: "stale_conflict",
            run: stale_conflict,
        },
        DiagnosticRule {
            name: "retry_exceeded",
            run: retry_exceeded,
        },
        DiagnosticRule {
            name: "resolution_timeout",
            run: resolution_timeout,
        },
        DiagnosticRule {
            name: "inconsistent_state",
            run: inconsistent_state,
        },
    ]
}

/// An active conflict has sat unresolved too long. Emits one issue at
/// most: critical past the critical threshold, otherwise warning past
/// the warning threshold.
fn stale_conflict(
    conflict: &ConflictState,
    config: &DiagnosticsConfig,
    now: DateTime<Utc>,
) -> Vec<DiagnosticIssue> {
    if !conflict.is_active() {
        return Vec::new();
    }
    let age = conflict.age(now);
    if age >= chrono::Duration::from_std(config.stale_critical).unwrap_or(chrono::Duration::MAX) {
        vec![DiagnosticIssue::new(
            IssueSeverity::Critical,
            format!(
                "stale conflict: {} on {} {} unresolved for {}s",
                conflict.conflict_type,
                conflict.entity_type,
                conflict.entity_id,
                age.num_seconds()
            ),
            "resolve the conflict manually or check why automatic resolution stalled",
        )]
    } else if age
        >= chrono::Duration::from_std(config.stale_warning).unwrap_or(chrono::Duration::MAX)
    {
        vec![DiagnosticIssue::new(
            IssueSeverity::Warning,
            format!(
                "conflict on {} {} pending for {}s",
                conflict.entity_type,
                conflict.entity_id,
                age.num_seconds()
            ),
            "review pending conflicts before they go stale",
        )]
    } else {
        Vec::new()
    }
}

/// Automatic resolution ran out of retries.
fn retry_exceeded(
    conflict: &ConflictState,
    _config: &DiagnosticsConfig,
    _now: DateTime<Utc>,
) -> Vec<DiagnosticIssue> {
    if conflict.retry_count >= conflict.max_retries {
        vec![DiagnosticIssue::new(
            IssueSeverity::Error,
            format!(
                "conflict on {} {} exhausted {} resolution retries",
                conflict.entity_type, conflict.entity_id, conflict.max_retries
            ),
            "resolve manually; automatic retries are exhausted",
        )]
    } else {
        Vec::new()
    }
}

/// A conflict has been stuck in `resolving` past the timeout. Time spent
/// idling in earlier statuses does not count.
fn resolution_timeout(
    conflict: &ConflictState,
    config: &DiagnosticsConfig,
    now: DateTime<Utc>,
) -> Vec<DiagnosticIssue> {
    if conflict.status != ConflictStatus::Resolving {
        return Vec::new();
    }
    let in_status = conflict.time_in_status(now);
    if in_status
        >= chrono::Duration::from_std(config.resolution_timeout).unwrap_or(chrono::Duration::MAX)
    {
        vec![DiagnosticIssue::new(
            IssueSeverity::Warning,
            format!(
                "resolution of conflict on {} {} running for {}s",
                conflict.entity_type,
                conflict.entity_id,
                in_status.num_seconds()
            ),
            "check store adapter latency; the resolution may be stuck",
        )]
    } else {
        Vec::new()
    }
}

/// A resolved conflict where the local side was newer than the remote
/// side it supposedly converged with. Signals a possible merge bug.
fn inconsistent_state(
    conflict: &ConflictState,
    _config: &DiagnosticsConfig,
    _now: DateTime<Utc>,
) -> Vec<DiagnosticIssue> {
    if conflict.status == ConflictStatus::Resolved
        && conflict.local_version > conflict.remote_version
    {
        vec![DiagnosticIssue::new(
            IssueSeverity::Warning,
            format!(
                "resolved conflict on {} {} has local version {} ahead of remote {}",
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_version,
                conflict.remote_version
            ),
            "verify the merge kept the newer local changes",
        )]
    } else {
        Vec::new()
    }
}
