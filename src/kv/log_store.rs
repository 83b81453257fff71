//! Durable append-only batch log
//!
//! Every `write_batch` call becomes one checksummed record appended to
//! `<data_dir>/kv/batches.log`. The record is fsynced before the in-memory
//! ordered index is updated, so a batch is visible only once it is durable.
//!
//! On open the log is replayed from the start. Any checksum failure,
//! truncated record, or out-of-order sequence number is corruption and
//! aborts the open: the store never silently drops part of its history.
//!
//! A failed append is cut back out of the file. If that cut fails too, the
//! store keeps serving reads but refuses every later write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::errors::{KvError, KvResult};
use super::record::{BatchRecord, KvOp};
use super::{apply_ops, scan_index, KvStore};

struct LogState {
    file: File,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    next_sequence: u64,
    current_offset: u64,
    /// Offset of a failed append whose bytes could not be cut from the file.
    unrepaired_tail: Option<u64>,
}

/// File-backed store replaying an append-only log of atomic batches.
pub struct LogKvStore {
    log_path: PathBuf,
    sync_on_write: bool,
    replayed_records: u64,
    state: RwLock<LogState>,
}

impl std::fmt::Debug for LogKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogKvStore")
            .field("log_path", &self.log_path)
            .field("sync_on_write", &self.sync_on_write)
            .field("replayed_records", &self.replayed_records)
            .finish()
    }
}

impl LogKvStore {
    /// Opens or creates the batch log under `data_dir`.
    ///
    /// Creates `<data_dir>/kv/batches.log` and parent directories if needed,
    /// then replays every record into the in-memory index.
    ///
    /// # Errors
    ///
    /// - `KvError::Io` if the directory or file cannot be created or read
    /// - `KvError::CorruptionAt` if any record fails validation
    pub fn open(data_dir: &Path, sync_on_write: bool) -> KvResult<Self> {
        let kv_dir = data_dir.join("kv");
        let log_path = kv_dir.join("batches.log");

        if !kv_dir.exists() {
            fs::create_dir_all(&kv_dir).map_err(|e| {
                KvError::io(
                    format!("Failed to create store directory: {}", kv_dir.display()),
                    e,
                )
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                KvError::io(format!("Failed to open log: {}", log_path.display()), e)
            })?;

        let contents = fs::read(&log_path)
            .map_err(|e| KvError::io(format!("Failed to read log: {}", log_path.display()), e))?;

        let (index, last_sequence, replayed_records) = Self::replay(&contents)?;

        Ok(Self {
            log_path,
            sync_on_write,
            replayed_records,
            state: RwLock::new(LogState {
                file,
                index,
                next_sequence: last_sequence + 1,
                current_offset: contents.len() as u64,
                unrepaired_tail: None,
            }),
        })
    }

    /// Rebuilds the ordered index from raw log contents.
    ///
    /// Returns the index, the last sequence number seen (0 for an empty log)
    /// and the number of records replayed.
    fn replay(contents: &[u8]) -> KvResult<(BTreeMap<Vec<u8>, Vec<u8>>, u64, u64)> {
        let mut index = BTreeMap::new();
        let mut offset = 0usize;
        let mut last_sequence = 0u64;
        let mut replayed = 0u64;

        while offset < contents.len() {
            let (record, consumed) = BatchRecord::deserialize(&contents[offset..])
                .map_err(|e| KvError::corruption_at(offset as u64, e.to_string()))?;

            if record.sequence <= last_sequence {
                return Err(KvError::corruption_at(
                    offset as u64,
                    format!(
                        "Sequence number {} does not follow {}",
                        record.sequence, last_sequence
                    ),
                ));
            }

            last_sequence = record.sequence;
            apply_ops(&mut index, record.ops);
            offset += consumed;
            replayed += 1;
        }

        Ok((index, last_sequence, replayed))
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Number of records replayed when the store was opened.
    pub fn replayed_records(&self) -> u64 {
        self.replayed_records
    }

    /// Current size of the log in bytes.
    pub fn current_offset(&self) -> u64 {
        self.state
            .read()
            .map(|state| state.current_offset)
            .unwrap_or(0)
    }
}

impl KvStore for LogKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let state = self.state.read().map_err(|_| KvError::Poisoned)?;
        Ok(state.index.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read().map_err(|_| KvError::Poisoned)?;
        Ok(scan_index(&state.index, prefix))
    }

    fn write_batch(&self, ops: Vec<KvOp>) -> KvResult<()> {
        let mut state = self.state.write().map_err(|_| KvError::Poisoned)?;

        if let Some(offset) = state.unrepaired_tail {
            return Err(KvError::Corruption(format!(
                "Log holds an unrepaired partial append at offset {}, writes are refused",
                offset
            )));
        }

        let record = BatchRecord::new(state.next_sequence, ops);
        let serialized = record.serialize().map_err(|e| {
            KvError::io(format!("Failed to encode batch {}", record.sequence), e)
        })?;
        let offset = state.current_offset;

        let written = state
            .file
            .write_all(&serialized)
            .and_then(|_| {
                if self.sync_on_write {
                    state.file.sync_all()
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            // Cut any partial append so the next record starts on a boundary.
            if let Err(truncate) = state.file.set_len(offset) {
                state.unrepaired_tail = Some(offset);
                return Err(KvError::Corruption(format!(
                    "Append of batch {} failed ({}) and the partial record at offset {} could not be cut ({})",
                    record.sequence, e, offset, truncate
                )));
            }
            return Err(KvError::io(
                format!("Failed to append batch {}", record.sequence),
                e,
            ));
        }

        state.current_offset += serialized.len() as u64;
        state.next_sequence += 1;
        apply_ops(&mut state.index, record.ops);
        Ok(())
    }
}
