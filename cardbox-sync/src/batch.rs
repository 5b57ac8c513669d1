//! Batch grouping and packing.
//!
//! Operations are sorted by descending priority (stable, so detection
//! order breaks ties and nothing starves), grouped by source side, entity
//! type, and operation kind so each batch maps to one grouped store call,
//! and packed under the configured item and byte ceilings.

use crate::config::SyncConfig;
use crate::diff::DiffOperation;
use crate::operation::{Priority, SourceSide, SyncOperation};
use cardbox_types::{BatchId, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::debug;

/// A bounded group of operations executed together.
///
/// All member operations share the same source side, entity type, and
/// operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    pub id: BatchId,
    pub operations: Vec<SyncOperation>,
    pub estimated_size_bytes: usize,
    pub priority: Priority,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SyncBatch {
    fn from_operations(operations: Vec<SyncOperation>) -> Self {
        let estimated_size_bytes = operations.iter().map(SyncOperation::estimated_size).sum();
        let priority = Self::derive_priority(&operations);
        Self {
            id: BatchId::new(),
            operations,
            estimated_size_bytes,
            priority,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Highest member priority, escalated to critical when any member is
    /// a high-priority delete.
    fn derive_priority(operations: &[SyncOperation]) -> Priority {
        if operations.iter().any(SyncOperation::is_priority_delete) {
            return Priority::Critical;
        }
        operations
            .iter()
            .map(|op| op.priority)
            .max()
            .unwrap_or(Priority::Normal)
    }

    /// The shared source side of the batch.
    #[must_use]
    pub fn source(&self) -> Option<SourceSide> {
        self.operations.first().map(|op| op.source)
    }

    /// The shared entity type of the batch.
    #[must_use]
    pub fn entity_type(&self) -> Option<EntityType> {
        self.operations.first().map(|op| op.entity_type)
    }

    /// The shared operation kind of the batch.
    #[must_use]
    pub fn operation(&self) -> Option<DiffOperation> {
        self.operations.first().map(|op| op.op)
    }

    /// Number of member operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the batch has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Groups operations into size/priority-bounded batches.
pub struct BatchScheduler {
    max_items: usize,
    max_bytes: usize,
}

impl BatchScheduler {
    /// Creates a scheduler from the engine configuration.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            max_items: config.max_batch_items.max(1),
            max_bytes: config.max_batch_bytes.max(1),
        }
    }

    /// Packs operations into batches.
    ///
    /// A batch closes when adding the next operation would exceed either
    /// ceiling. A single operation larger than the byte ceiling forms its
    /// own batch rather than being dropped. Returned batches are ordered
    /// by descending priority.
    #[must_use]
    pub fn schedule(&self, mut operations: Vec<SyncOperation>) -> Vec<SyncBatch> {
        if operations.is_empty() {
            return Vec::new();
        }

        // Stable sort keeps detection order within equal priorities.
        operations.sort_by_key(|op| Reverse(op.priority));

        // Group by execution key, preserving the priority-sorted order
        // within each group.
        let mut group_order: Vec<(SourceSide, EntityType, DiffOperation)> = Vec::new();
        let mut groups: HashMap<(SourceSide, EntityType, DiffOperation), Vec<SyncOperation>> =
            HashMap::new();
        for op in operations {
            let key = (op.source, op.entity_type, op.op);
            if !groups.contains_key(&key) {
                group_order.push(key);
            }
            groups.entry(key).or_default().push(op);
        }

        let mut batches = Vec::new();
        for key in group_order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            self.pack_group(group, &mut batches);
        }

        // Highest-priority batches dispatch first.
        batches.sort_by_key(|b| Reverse(b.priority));
        debug!(batches = batches.len(), "batch schedule built");
        batches
    }

    fn pack_group(&self, group: Vec<SyncOperation>, batches: &mut Vec<SyncBatch>) {
        let mut current: Vec<SyncOperation> = Vec::new();
        let mut current_bytes = 0usize;

        for op in group {
            let size = op.estimated_size();

            // Oversized operation: flush whatever is open, then emit the
            // operation as a singleton batch.
            if size > self.max_bytes {
                if !current.is_empty() {
                    batches.push(SyncBatch::from_operations(std::mem::take(&mut current)));
                    current_bytes = 0;
                }
                batches.push(SyncBatch::from_operations(vec![op]));
                continue;
            }

            let would_overflow = current.len() + 1 > self.max_items
                || current_bytes + size > self.max_bytes;
            if would_overflow && !current.is_empty() {
                batches.push(SyncBatch::from_operations(std::mem::take(&mut current)));
                current_bytes = 0;
            }

            current_bytes += size;
            current.push(op);
        }

        if !current.is_empty() {
            batches.push(SyncBatch::from_operations(current));
        }
    }
}
