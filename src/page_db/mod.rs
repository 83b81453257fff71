//! Page storage engine
//!
//! Persists the commit DAG of one page (heads, commits, merges), its
//! content-addressed objects, and the bookkeeping the synchronization layer
//! needs (commit sync state, generation counter, sync metadata, online flag).
//!
//! # Design Principles
//!
//! - Reads go through [`PageDb`] and see only fully executed batches
//! - Writes go through a [`Batch`] and land atomically on `execute`
//! - Object identifiers are derived from content, never supplied separately
//! - Object status and commit generations only move forward
//! - Corruption is reported as a fatal internal consistency error

mod batch;
mod db;
mod errors;
mod keys;
mod types;

pub use batch::{Batch, PageDbBatch};
pub use db::PageDb;
pub use errors::{PageDbError, PageDbErrorCode, PageDbResult, Severity};
pub use keys::normalize_parents;
pub use types::{CommitId, ObjectChunk, ObjectIdentifier, ObjectStatus, SyncState, DIGEST_LEN};
