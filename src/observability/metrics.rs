//! Counters for the page storage engine
//!
//! Counters only, monotonic, reset only when the registry is created.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one page database.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    batches_interrupted: AtomicU64,
    mutations_applied: AtomicU64,
    bytes_written: AtomicU64,
    objects_written: AtomicU64,
    reads: AtomicU64,
    reads_interrupted: AtomicU64,
    replayed_records: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a durably committed batch of `mutations` key writes.
    pub fn record_batch_committed(&self, mutations: u64, bytes: u64) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.mutations_applied.fetch_add(mutations, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_batches_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_interrupted(&self) {
        self.batches_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_objects_written(&self, count: u64) {
        self.objects_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_reads(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reads_interrupted(&self) {
        self.reads_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_replayed_records(&self, count: u64) {
        self.replayed_records.store(count, Ordering::Relaxed);
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_interrupted: self.batches_interrupted.load(Ordering::Relaxed),
            mutations_applied: self.mutations_applied.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            objects_written: self.objects_written.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            reads_interrupted: self.reads_interrupted.load(Ordering::Relaxed),
            replayed_records: self.replayed_records.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub batches_interrupted: u64,
    pub mutations_applied: u64,
    pub bytes_written: u64,
    pub objects_written: u64,
    pub reads: u64,
    pub reads_interrupted: u64,
    pub replayed_records: u64,
}
