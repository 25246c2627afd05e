//! Write-ahead log for the persistent ledger.
//!
//! Every accepted commit is appended here (and optionally fsynced) before it
//! touches the in-memory tables. On open the log is scanned once: complete
//! records are handed back for replay, a record cut short by a crash is
//! dropped, and any other damage aborts the open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogExercise, UserExercise};
use crate::storage::traits::CommitBatch;

use super::codec;

/// One log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing within one log generation.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: WalEntryKind,
}

/// What a log record changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// One reconciled workout, applied atomically.
    Commit(CommitBatch),
    CatalogInsert(CatalogExercise),
    UserExerciseInsert(UserExercise),
}

#[derive(Debug)]
struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Append-only log, safe to share between threads.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create the log at `path`.
    ///
    /// Returns the log together with every complete record it holds, in
    /// append order. A torn final record is cut off the file so later
    /// appends start on a clean boundary.
    ///
    /// # Errors
    /// - the header is not a ledger log header
    /// - a complete record fails its checksum or cannot be decoded
    /// - any underlying I/O error
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let entries = if file.metadata()?.len() < codec::HEADER_LEN {
            // Empty, or a crash hit while the header was being written.
            file.set_len(0)?;
            let mut writer = &file;
            codec::write_header(&mut writer)?;
            if sync_on_write {
                file.sync_all()?;
            }
            Vec::new()
        } else {
            recover(&file, path)?
        };
        let sequence = entries.last().map_or(0, |e| e.sequence);

        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };
        Ok((wal, entries))
    }

    fn writer(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "WAL writer lock poisoned"))
    }

    /// Append one record and return its sequence number.
    ///
    /// The sequence only advances once the record is on disk. A failed
    /// append leaves the file as it was before the call.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer()?;
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let pre_len = writer.file.get_ref().metadata()?.len();
        if let Err(e) = self.write_record(&mut writer, &encoded) {
            if let Err(rollback) = self.discard_since(&mut writer, pre_len) {
                tracing::error!(
                    path = %self.path.display(),
                    pre_len,
                    error = %rollback,
                    "failed to roll back partial WAL append"
                );
            }
            return Err(e);
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    fn write_record(&self, writer: &mut WalWriter, encoded: &[u8]) -> IoResult<()> {
        writer.file.write_all(encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Drop buffered bytes that never reached the file and cut the file back
    /// to `len`, so a rejected record is neither replayed nor left torn.
    fn discard_since(&self, writer: &mut WalWriter, len: u64) -> IoResult<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut writer.file, BufWriter::new(fresh));
        // `into_parts` hands back the buffer instead of flushing it on drop.
        let (_file, _unwritten) = stale.into_parts();
        writer.file.get_ref().set_len(len)?;
        if self.sync_on_write {
            writer.file.get_ref().sync_all()?;
        }
        Ok(())
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Discard every record, leaving only the header.
    ///
    /// Only call this once the records are captured by a durable snapshot.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.writer()?;
        writer.file.flush()?;
        writer.file.get_ref().set_len(0)?;
        codec::write_header(&mut writer.file)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_all()?;
        }
        writer.sequence = 0;
        Ok(())
    }
}

fn recover(file: &File, path: &Path) -> IoResult<Vec<WalEntry>> {
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut entries: Vec<WalEntry> = Vec::new();
    loop {
        let offset = reader.stream_position()?;
        if offset >= len {
            break;
        }
        match codec::decode::<WalEntry>(&mut reader) {
            Ok(entry) => entries.push(entry),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    dropped_bytes = len - offset,
                    "dropping torn record at end of WAL"
                );
                file.set_len(offset)?;
                break;
            }
            Err(e) => {
                let sequence = entries.last().map_or(0, |last| last.sequence) + 1;
                return Err(IoError::new(
                    e.kind(),
                    format!("WAL record {sequence} at offset {offset} is unreadable: {e}"),
                ));
            }
        }
    }

    tracing::debug!(path = %path.display(), records = entries.len(), "scanned WAL");
    Ok(entries)
}
