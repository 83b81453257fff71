//! Observable events of the page storage engine

use std::fmt;

/// Lifecycle and batch events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    ConfigLoaded,

    // Store lifecycle
    /// Page database opened over a store
    PageDbOpened,
    /// Batch log replay finished
    StoreReplayComplete,
    /// Persisted state failed validation (FATAL)
    StoreCorruption,

    // Batches
    BatchExecuteBegin,
    BatchCommitted,
    BatchFailed,
    BatchInterrupted,
    /// Mutation on a batch that already executed (FATAL)
    BatchReused,

    // Objects and sync bookkeeping
    /// Stored object content does not match its identifier (FATAL)
    ObjectContentMismatch,
    /// Contradictory merge re-insertion (FATAL)
    MergeConflict,
    PageMarkedOnline,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PageDbOpened => "PAGE_DB_OPENED",
            Event::StoreReplayComplete => "STORE_REPLAY_COMPLETE",
            Event::StoreCorruption => "STORE_CORRUPTION",
            Event::BatchExecuteBegin => "BATCH_EXECUTE_BEGIN",
            Event::BatchCommitted => "BATCH_COMMITTED",
            Event::BatchFailed => "BATCH_FAILED",
            Event::BatchInterrupted => "BATCH_INTERRUPTED",
            Event::BatchReused => "BATCH_REUSED",
            Event::ObjectContentMismatch => "OBJECT_CONTENT_MISMATCH",
            Event::MergeConflict => "MERGE_CONFLICT",
            Event::PageMarkedOnline => "PAGE_MARKED_ONLINE",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::StoreCorruption
                | Event::BatchReused
                | Event::ObjectContentMismatch
                | Event::MergeConflict
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
