//! pagedb - local page storage engine of a versioned key-value store
//!
//! Layers, leaves first:
//!
//! - [`kv`]: ordered key-value stores with atomic batches
//! - [`coroutine`]: suspension of storage calls with interruption
//! - [`page_db`]: commit DAG, object store and sync bookkeeping
//! - [`observability`]: structured logs and counters
//! - [`config`]: page database configuration

pub mod config;
pub mod coroutine;
pub mod kv;
pub mod observability;
pub mod page_db;

pub use config::{ConfigError, PageDbConfig, StoreBackend, SyncMode};
pub use coroutine::{CoroutineHandler, Interrupted, Interrupter};
pub use page_db::{
    Batch, CommitId, ObjectChunk, ObjectIdentifier, ObjectStatus, PageDb, PageDbBatch,
    PageDbError, PageDbErrorCode, PageDbResult, SyncState,
};
