//! Storage boundary for the Cardbox sync engine.
//!
//! The sync core is protocol-agnostic: it reaches the local and remote
//! entity collections only through the [`EntityStoreAdapter`] trait, and
//! learns the active user through [`AuthProvider`]. The one piece of
//! storage the sync layer owns directly is the [`ConflictStore`], a small
//! SQLite database holding conflict records across restarts.

mod adapter;
mod conflict_store;
mod error;

pub use adapter::{
    mock, AuthProvider, EntityStoreAdapter, ItemOutcome, StaticAuth, UserScope,
};
pub use conflict_store::ConflictStore;
pub use error::{StorageError, StorageResult};
