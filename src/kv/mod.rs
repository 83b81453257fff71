//! Ordered key-value store underneath the page storage engine
//!
//! The engine only needs three primitives from its store: point reads,
//! ordered prefix scans, and atomic multi-put/delete batches. Two
//! implementations are provided:
//!
//! - [`MemoryKvStore`]: ordered in-memory map with fault injection for tests
//! - [`LogKvStore`]: durable append-only batch log, replayed on open
//!
//! # Guarantees
//!
//! - `write_batch` applies every operation or none of them
//! - Readers never observe a partially applied batch
//! - Batches become visible in the order they were written

mod checksum;
mod errors;
mod log_store;
mod memory;
mod record;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{KvError, KvResult};
pub use log_store::LogKvStore;
pub use memory::MemoryKvStore;
pub use record::{BatchRecord, KvOp};

use std::collections::BTreeMap;
use std::fmt;

/// Ordered byte-key store with atomic batches.
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Point read.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically apply `ops` in order. On error nothing is applied.
    fn write_batch(&self, ops: Vec<KvOp>) -> KvResult<()>;
}

/// Applies operations to an ordered map. Shared by both stores.
pub(crate) fn apply_ops(index: &mut BTreeMap<Vec<u8>, Vec<u8>>, ops: Vec<KvOp>) {
    for op in ops {
        match op {
            KvOp::Put { key, value } => {
                index.insert(key, value);
            }
            KvOp::Delete { key } => {
                index.remove(&key);
            }
        }
    }
}

/// Collects the entries of `index` under `prefix`.
pub(crate) fn scan_index(
    index: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    index
        .range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
