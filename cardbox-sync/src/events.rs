//! Typed sync events over a bounded channel.
//!
//! Each event carries a statically known payload; subscribers take the
//! receiving half of a bounded queue. Publishing never blocks the sync
//! pipeline: a full queue drops the event and bumps a counter instead.

use cardbox_types::{BatchId, ConflictId, ConflictSeverity, EntityId, EntityType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted by a sync session.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A session started for a user scope.
    SessionStarted { scope: String },

    /// Change detection finished for one entity type.
    DiffsDetected {
        entity_type: EntityType,
        local: usize,
        remote: usize,
    },

    /// A conflict was recorded by the lifecycle manager.
    ConflictDetected {
        conflict_id: ConflictId,
        entity_type: EntityType,
        entity_id: EntityId,
        severity: ConflictSeverity,
    },

    /// A batch finished successfully.
    BatchCompleted { batch_id: BatchId, processed: usize },

    /// A batch exhausted its retries.
    BatchFailed { batch_id: BatchId, error: String },

    /// The session finished (possibly partially).
    SessionFinished {
        success: bool,
        processed: usize,
        failed: usize,
    },
}

/// Publishing half of the event channel.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<SyncEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// A sender with no subscriber; publishing is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a bounded channel and returns the sender/receiver pair.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Publishes an event without blocking. A full or closed queue drops
    /// the event and bumps the drop counter.
    pub fn publish(&self, event: SyncEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("sync event dropped: {e}");
        }
    }

    /// Number of events dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
