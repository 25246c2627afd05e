//! Storage layer for the ledger.
//!
//! The [`WorkoutStore`] trait is the only seam the engine talks to. Backends
//! share the flat identity-map tables in `tables` and differ only in how they
//! make a commit durable.

mod identity;
mod memory;
mod tables;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use identity::{IdentityGenerator, RandomIdentities, SequentialIdentities};
pub use memory::InMemoryWorkoutStore;
pub use traits::{CommitBatch, HistoryEntry, Mutation, StorageError, WorkoutStore};

#[cfg(feature = "persistent")]
pub use persistent::{open_ledger, PersistentConfig, PersistentWorkoutStore};
