//! Replica sync engine for Cardbox.
//!
//! Keeps a local replica and a remote replica of cards, folders, tags
//! and images converged, and turns anything that cannot be converged
//! automatically into an explicit, inspectable conflict.
//!
//! # Architecture
//!
//! - **Detector**: hashes entity snapshots and produces field-level diffs
//! - **Conflict detection**: classifies overlapping local/remote diffs
//! - **Operations & batches**: diffs become prioritized operations,
//!   packed into batches by entity type and operation kind
//! - **Executor**: runs batches under a concurrency bound with retry
//!   and backoff
//! - **Lifecycle**: owns conflict state machines and their persistence
//!
//! # Sync session
//!
//! 1. Read both replicas per entity type and detect changes
//! 2. Classify conflicts; conflicted entities sit out the pass
//! 3. Build and schedule operations for everything else
//! 4. Execute batches, then advance the remote sync cursor
//!
//! # Example
//!
//! ```no_run
//! use cardbox_store::{mock::MemoryAdapter, StaticAuth};
//! use cardbox_sync::{SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> cardbox_sync::SyncResult<()> {
//! let adapter = Arc::new(MemoryAdapter::new());
//! let auth = Arc::new(StaticAuth(Some("user-1".to_string())));
//! let engine = SyncEngine::new(SyncConfig::default(), adapter, auth, None);
//! let outcome = engine.try_sync().await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod conflict_detect;
pub mod detector;
mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod operation;
pub mod session;

mod diff;

pub use batch::{BatchScheduler, SyncBatch};
pub use config::{NetworkQuality, SyncConfig};
pub use conflict_detect::ConflictDetector;
pub use detector::ChangeDetector;
pub use diff::{DiffOperation, EntityDiff, FieldChange};
pub use error::{SyncError, SyncResult};
pub use events::{EventSender, SyncEvent};
pub use executor::{BatchExecutor, ExecutionReport, SessionIssue};
pub use lifecycle::{merge_records, ConflictManager, PersistenceStats};
pub use operation::{OperationBuilder, OperationPayload, Priority, SourceSide, SyncOperation};
pub use session::{SessionOutcome, SessionReport, SyncEngine};
