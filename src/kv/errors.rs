//! Key-value store errors

use std::io;

use thiserror::Error;

/// Result type for key-value store operations
pub type KvResult<T> = Result<T, KvError>;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum KvError {
    #[error("I/O error: {message}: {source}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("Corruption at byte offset {offset}: {reason}")]
    CorruptionAt { offset: u64, reason: String },

    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl KvError {
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        KvError::Io {
            message: message.into(),
            source,
        }
    }

    pub fn corruption_at(offset: u64, reason: impl Into<String>) -> Self {
        KvError::CorruptionAt {
            offset,
            reason: reason.into(),
        }
    }

    /// Corruption means the persisted state can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, KvError::Corruption(_) | KvError::CorruptionAt { .. })
    }
}
