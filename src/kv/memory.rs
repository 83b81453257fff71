//! In-memory ordered store with fault injection

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use super::errors::{KvError, KvResult};
use super::record::KvOp;
use super::{apply_ops, scan_index, KvStore};

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming `write_batch` calls that fail without applying.
    failing_writes: usize,
    /// Delay before a batch is applied, to hold a writer mid-flight.
    write_delay: Option<Duration>,
}

/// Ordered in-memory store.
///
/// Batches are applied under a single write lock, so readers observe
/// either none or all of a batch.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    faults: Mutex<Faults>,
    batches_applied: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` batches fail with an injected I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_writes = count;
        }
    }

    /// Sleep for `delay` inside every subsequent `write_batch` before applying.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.write_delay = delay;
        }
    }

    /// Number of batches successfully applied.
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::Relaxed)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let index = self.index.read().map_err(|_| KvError::Poisoned)?;
        Ok(index.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let index = self.index.read().map_err(|_| KvError::Poisoned)?;
        Ok(scan_index(&index, prefix))
    }

    fn write_batch(&self, ops: Vec<KvOp>) -> KvResult<()> {
        let delay = {
            let mut faults = self.faults.lock().map_err(|_| KvError::Poisoned)?;
            if faults.failing_writes > 0 {
                faults.failing_writes -= 1;
                return Err(KvError::Injected(format!(
                    "write of {} operations rejected",
                    ops.len()
                )));
            }
            faults.write_delay
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut index = self.index.write().map_err(|_| KvError::Poisoned)?;
        apply_ops(&mut index, ops);
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
