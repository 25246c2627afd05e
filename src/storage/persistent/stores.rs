//! Durable [`WorkoutStore`] backed by a snapshot file plus a write-ahead log.
//!
//! Reads are served from in-memory [`WorkoutTables`]. A commit is checked
//! against the tables, appended to the WAL as a single record, and only then
//! applied, all under one write lock. Compaction folds the tables into
//! `ledger.snapshot` and empties the WAL.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{StoredAggregate, WorkoutRow};
use crate::catalog::{CatalogExercise, UserExercise};
use crate::error::{LedgerError, LedgerResult};
use crate::id::{CatalogExerciseId, UserExerciseId, UserId, WorkoutId};
use crate::storage::identity::{IdentityGenerator, RandomIdentities};
use crate::storage::tables::{TablesSnapshot, WorkoutTables};
use crate::storage::traits::{CommitBatch, HistoryEntry, StorageError, WorkoutStore};
use crate::workout::ExerciseRef;

use super::codec;
use super::file_lock::FileLock;
use super::wal::{WalEntry, WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "ledger.wal";
const SNAPSHOT_FILE: &str = "ledger.snapshot";
const SNAPSHOT_TMP_FILE: &str = "ledger.snapshot.tmp";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    created_at: DateTime<Utc>,
    tables: TablesSnapshot,
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Workout, exercise and set rows written to the snapshot.
    pub rows_compacted: usize,
    pub snapshot_path: PathBuf,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

/// Workout store persisted in a ledger directory.
#[derive(Debug)]
pub struct PersistentWorkoutStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    tables: RwLock<WorkoutTables>,
    identities: Arc<dyn IdentityGenerator>,
    config: PersistentConfig,
}

impl PersistentWorkoutStore {
    /// Open (or create) the ledger in `dir` and rebuild its tables.
    ///
    /// # Errors
    /// - the directory cannot be created or is locked by another process
    /// - the snapshot or a complete WAL record is corrupted
    pub fn open(dir: &Path, config: PersistentConfig) -> LedgerResult<Self> {
        Self::open_with_identities(dir, config, Arc::new(RandomIdentities))
    }

    /// Like [`Self::open`], with an explicit identity generator.
    pub fn open_with_identities(
        dir: &Path,
        config: PersistentConfig,
        identities: Arc<dyn IdentityGenerator>,
    ) -> LedgerResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            LedgerError::storage(format!("failed to create ledger directory: {e}"))
        })?;
        let lock = FileLock::acquire(dir)
            .map_err(|e| LedgerError::storage(format!("failed to acquire lock: {e}")))?;

        let mut tables = load_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| LedgerError::storage(format!("failed to open WAL: {e}")))?;
        let replayed = entries.len();
        for entry in entries {
            replay(&mut tables, entry);
        }

        tracing::info!(
            dir = %dir.display(),
            replayed,
            rows = tables.row_count(),
            "opened persistent ledger"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            tables: RwLock::new(tables),
            identities,
            config,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    /// Fold every committed change into the snapshot and empty the WAL.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written. The WAL is left
    /// untouched in that case.
    pub fn compact(&self) -> LedgerResult<CompactionResult> {
        let tables = self
            .tables
            .write()
            .map_err(|_| LedgerError::from(lock_err("ledger.compact")))?;
        self.compact_locked(&tables)
    }

    fn compact_locked(&self, tables: &WorkoutTables) -> LedgerResult<CompactionResult> {
        let wal_size_before = self.wal.size_bytes().unwrap_or(0);
        let snapshot_path = self.dir.join(SNAPSHOT_FILE);

        write_snapshot(&self.dir, tables.snapshot(), self.config.sync_on_write)?;
        self.wal
            .truncate()
            .map_err(|e| LedgerError::storage(format!("failed to truncate WAL: {e}")))?;

        let result = CompactionResult {
            rows_compacted: tables.row_count(),
            snapshot_path,
            wal_size_before,
            wal_size_after: self.wal.size_bytes().unwrap_or(0),
        };
        tracing::info!(
            rows = result.rows_compacted,
            wal_size_before = result.wal_size_before,
            "compacted ledger"
        );
        Ok(result)
    }

    /// Compact once the WAL outgrows its budget. The commit that triggered it
    /// is already durable, so a failure here is only logged.
    fn maybe_compact(&self, tables: &WorkoutTables) {
        let size = self.wal.size_bytes().unwrap_or(0);
        if size < self.config.max_wal_size {
            return;
        }
        tracing::debug!(size, max = self.config.max_wal_size, "WAL over budget");
        if let Err(e) = self.compact_locked(tables) {
            tracing::warn!(error = %e, "automatic compaction failed");
        }
    }

    fn append(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| StorageError::Backend(format!("WAL write failed: {e}")))
    }
}

fn load_snapshot(path: &Path) -> LedgerResult<WorkoutTables> {
    if !path.exists() {
        return Ok(WorkoutTables::default());
    }
    let file = File::open(path)
        .map_err(|e| LedgerError::storage(format!("failed to open snapshot: {e}")))?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)
        .and_then(|()| codec::decode::<SnapshotFile>(&mut reader))
        .map(|snapshot| WorkoutTables::from_snapshot(snapshot.tables))
        .map_err(|e| LedgerError::storage(format!("corrupted snapshot {}: {e}", path.display())))
}

fn write_snapshot(dir: &Path, tables: TablesSnapshot, sync: bool) -> LedgerResult<()> {
    let tmp = dir.join(SNAPSHOT_TMP_FILE);
    let write = || -> std::io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(&SnapshotFile {
            created_at: Utc::now(),
            tables,
        })?)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, dir.join(SNAPSHOT_FILE))
    };
    write().map_err(|e| LedgerError::storage(format!("failed to write snapshot: {e}")))
}

/// Re-apply one logged change. Records already folded into the snapshot
/// apply as no-ops.
fn replay(tables: &mut WorkoutTables, entry: WalEntry) {
    match entry.kind {
        WalEntryKind::Commit(batch) => tables.apply_batch(batch),
        WalEntryKind::CatalogInsert(exercise) => {
            if tables.catalog_exercise(exercise.id).is_none() {
                let _ = tables.insert_catalog_exercise(exercise);
            }
        }
        WalEntryKind::UserExerciseInsert(exercise) => {
            if tables.user_exercise(exercise.id).is_none() {
                let _ = tables.insert_user_exercise(exercise);
            }
        }
    }
}

impl WorkoutStore for PersistentWorkoutStore {
    fn issue_identity(&self) -> Uuid {
        self.identities.next_identity()
    }

    fn load_aggregate(&self, id: WorkoutId) -> Result<Option<StoredAggregate>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("workout.load"))?;
        Ok(tables.aggregate(id))
    }

    fn list_workouts(&self, owner: UserId) -> Result<Vec<WorkoutRow>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("workout.list"))?;
        Ok(tables.list_workouts(owner))
    }

    fn commit(&self, batch: CommitBatch) -> Result<StoredAggregate, StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("workout.commit"))?;
        tables.check_batch(&batch)?;

        self.append(WalEntryKind::Commit(batch.clone()))?;

        let workout_id = batch.workout_id;
        tables.apply_batch(batch);
        self.maybe_compact(&tables);
        tables.aggregate(workout_id).ok_or_else(|| {
            StorageError::Backend(format!("workout {workout_id} missing after commit"))
        })
    }

    fn exercise_history(
        &self,
        owner: UserId,
        exercise: ExerciseRef,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("workout.history"))?;
        Ok(tables.exercise_history(owner, exercise))
    }

    fn insert_catalog_exercise(&self, exercise: CatalogExercise) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("catalog.insert"))?;
        if tables.catalog_exercise(exercise.id).is_some() {
            return Err(StorageError::DuplicateExercise(exercise.id.to_string()));
        }
        self.append(WalEntryKind::CatalogInsert(exercise.clone()))?;
        tables.insert_catalog_exercise(exercise)
    }

    fn get_catalog_exercise(
        &self,
        id: CatalogExerciseId,
    ) -> Result<Option<CatalogExercise>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("catalog.get"))?;
        Ok(tables.catalog_exercise(id))
    }

    fn insert_user_exercise(&self, exercise: UserExercise) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("user_exercise.insert"))?;
        if tables.user_exercise(exercise.id).is_some() {
            return Err(StorageError::DuplicateExercise(exercise.id.to_string()));
        }
        self.append(WalEntryKind::UserExerciseInsert(exercise.clone()))?;
        tables.insert_user_exercise(exercise)
    }

    fn get_user_exercise(&self, id: UserExerciseId) -> Result<Option<UserExercise>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("user_exercise.get"))?;
        Ok(tables.user_exercise(id))
    }

    fn list_user_exercises(&self, owner: UserId) -> Result<Vec<UserExercise>, StorageError> {
        let tables = self.tables.read().map_err(|_| lock_err("user_exercise.list"))?;
        Ok(tables.list_user_exercises(owner))
    }
}
