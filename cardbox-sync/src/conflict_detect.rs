//! Conflict detection over paired local/remote diff streams.
//!
//! Classification is a pure function of the two diffs, so repeated
//! detection cycles over the same inputs always produce the same
//! conflict type and severity.

use crate::diff::EntityDiff;
use cardbox_types::{ConflictSeverity, ConflictState, ConflictType};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Classifies overlapping diffs and emits conflict records.
pub struct ConflictDetector {
    /// `max_retries` stamped onto every emitted conflict.
    max_retries: u32,
}

impl ConflictDetector {
    /// Creates a detector whose conflicts allow `max_retries` resolution
    /// attempts.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Classifies one local/remote diff pair for the same entity.
    ///
    /// Returns `None` when the changes converge or compose:
    /// - both sides deleted (convergent outcome)
    /// - the local version dominates or matches the remote one
    /// - the changed field sets are disjoint, or overlap only on fields
    ///   whose target values agree
    #[must_use]
    pub fn classify(
        local: &EntityDiff,
        remote: &EntityDiff,
    ) -> Option<(ConflictType, ConflictSeverity)> {
        // Convergent delete: both sides already agree.
        if local.is_delete() && remote.is_delete() {
            return None;
        }

        // A destructive/non-destructive disagreement is the worst case:
        // resolving the wrong way loses data irrecoverably.
        if local.is_delete() != remote.is_delete() {
            return Some((ConflictType::Delete, ConflictSeverity::High));
        }

        // Local already dominates or matches; the remote change is stale
        // for this pass.
        if local.version >= remote.version {
            return None;
        }

        // Field-level overlap check: a conflict needs at least one common
        // field whose target values diverge.
        let diverging = local.changed_fields.iter().any(|(name, change)| {
            remote
                .changed_fields
                .get(name)
                .is_some_and(|other| other.new_value != change.new_value)
        });

        if diverging {
            Some((ConflictType::Content, ConflictSeverity::Medium))
        } else {
            None
        }
    }

    /// Inspects every entity present in both diff streams and returns the
    /// conflicts found, as new pending records.
    #[must_use]
    pub fn detect(&self, local_diffs: &[EntityDiff], remote_diffs: &[EntityDiff]) -> Vec<ConflictState> {
        let started = Instant::now();
        let remote_by_id: HashMap<_, _> = remote_diffs
            .iter()
            .map(|d| ((d.entity_type, d.entity_id.clone()), d))
            .collect();

        let mut conflicts = Vec::new();
        for local in local_diffs {
            let Some(remote) = remote_by_id.get(&(local.entity_type, local.entity_id.clone()))
            else {
                continue;
            };

            let Some((conflict_type, severity)) = Self::classify(local, remote) else {
                debug!(
                    entity_type = %local.entity_type,
                    entity_id = %local.entity_id,
                    "overlapping diffs converge; no conflict"
                );
                continue;
            };

            let mut conflict = ConflictState::new(
                local.entity_type,
                local.entity_id.clone(),
                conflict_type,
                severity,
                local.record.clone(),
                remote.record.clone(),
                self.max_retries,
            );
            // Versions and timestamps come from the diffs, which carry
            // them even when the record snapshot is gone (deletes).
            conflict.local_version = local.version;
            conflict.remote_version = remote.version;
            conflict.local_timestamp = Some(local.timestamp);
            conflict.remote_timestamp = Some(remote.timestamp);
            conflict.detection_time_ms = started.elapsed().as_millis() as u64;

            info!(
                entity_type = %conflict.entity_type,
                entity_id = %conflict.entity_id,
                conflict_type = %conflict.conflict_type,
                severity = %conflict.severity,
                "conflict detected"
            );
            conflicts.push(conflict);
        }
        conflicts
    }
}
