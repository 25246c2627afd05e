//! Persistent storage backend for the ledger.
//!
//! A ledger directory holds three files:
//!
//! ```text
//! ledger.lock      exclusive flock held while the store is open
//! ledger.snapshot  every row as of the last compaction
//! ledger.wal       commits accepted since that compaction
//! ```
//!
//! Both data files use the CRC32-framed records from `codec`. Opening the
//! directory loads the snapshot and replays the WAL over it.

mod codec;
mod file_lock;
mod stores;
mod wal;

pub use file_lock::FileLock;
pub use stores::{CompactionResult, PersistentWorkoutStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// WAL size (bytes) that triggers compaction after a commit.
    pub max_wal_size: u64,
    /// Whether to fsync after every write.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted WAL budget (4 KiB).
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the configuration, returning it unchanged when valid.
    pub fn validate(self) -> LedgerResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(LedgerError::storage(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent ledger in `path`.
///
/// # Errors
/// - the configuration is invalid
/// - the directory cannot be created or another process holds its lock
/// - the snapshot or WAL is corrupted
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use liftledger::{open_ledger, WorkoutEngine};
///
/// let store = Arc::new(open_ledger("./ledger", None)?);
/// let engine = WorkoutEngine::with_store(store);
/// ```
pub fn open_ledger(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> LedgerResult<PersistentWorkoutStore> {
    let config = config.unwrap_or_default().validate()?;
    PersistentWorkoutStore::open(path.as_ref(), config)
}
