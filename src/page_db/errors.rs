//! Page storage error types
//!
//! Error codes:
//! - PAGEDB_NOT_FOUND (ERROR severity)
//! - PAGEDB_INVALID_ARGUMENT (ERROR severity)
//! - PAGEDB_IO_ERROR (ERROR severity)
//! - PAGEDB_INTERRUPTED (ERROR severity)
//! - PAGEDB_INTERNAL_CONSISTENCY (FATAL severity)
//! - PAGEDB_BATCH_ALREADY_EXECUTED (FATAL severity)

use std::fmt;

use crate::kv::KvError;

/// Severity levels for page storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, the caller may retry or ignore
    Error,
    /// Program defect or data corruption; the page must not be used further
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Page storage error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDbErrorCode {
    /// Referenced entity does not exist
    NotFound,
    /// Malformed mutation input
    InvalidArgument,
    /// Underlying key-value store failure
    IoError,
    /// Coroutine interrupted while suspended on I/O
    Interrupted,
    /// Content/identifier mismatch or contradictory re-insertion
    InternalConsistency,
    /// Mutation issued on a batch whose execute already returned
    BatchAlreadyExecuted,
}

impl PageDbErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            PageDbErrorCode::NotFound => "PAGEDB_NOT_FOUND",
            PageDbErrorCode::InvalidArgument => "PAGEDB_INVALID_ARGUMENT",
            PageDbErrorCode::IoError => "PAGEDB_IO_ERROR",
            PageDbErrorCode::Interrupted => "PAGEDB_INTERRUPTED",
            PageDbErrorCode::InternalConsistency => "PAGEDB_INTERNAL_CONSISTENCY",
            PageDbErrorCode::BatchAlreadyExecuted => "PAGEDB_BATCH_ALREADY_EXECUTED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            PageDbErrorCode::NotFound
            | PageDbErrorCode::InvalidArgument
            | PageDbErrorCode::IoError
            | PageDbErrorCode::Interrupted => Severity::Error,
            PageDbErrorCode::InternalConsistency | PageDbErrorCode::BatchAlreadyExecuted => {
                Severity::Fatal
            }
        }
    }
}

impl fmt::Display for PageDbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Page storage error with context
#[derive(Debug)]
pub struct PageDbError {
    code: PageDbErrorCode,
    message: String,
    details: Option<String>,
    source: Option<KvError>,
}

impl PageDbError {
    fn with_code(code: PageDbErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(PageDbErrorCode::NotFound, message)
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_code(PageDbErrorCode::InvalidArgument, message)
    }

    /// Create an interrupted error
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::with_code(PageDbErrorCode::Interrupted, message)
    }

    /// Create an internal consistency error (FATAL)
    pub fn internal_consistency(message: impl Into<String>) -> Self {
        Self::with_code(PageDbErrorCode::InternalConsistency, message)
    }

    /// Create a batch reuse error (FATAL)
    pub fn batch_already_executed(batch_id: impl fmt::Display) -> Self {
        Self::with_code(
            PageDbErrorCode::BatchAlreadyExecuted,
            "Batch used after execute returned",
        )
        .with_details(format!("batch_id: {}", batch_id))
    }

    /// Wrap a key-value store failure.
    ///
    /// Store corruption is reported as an internal consistency fault, every
    /// other store failure as an I/O error.
    pub fn from_kv(message: impl Into<String>, source: KvError) -> Self {
        let code = if source.is_corruption() {
            PageDbErrorCode::InternalConsistency
        } else {
            PageDbErrorCode::IoError
        };
        Self {
            code,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Attach details about the error context
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> PageDbErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_not_found(&self) -> bool {
        self.code == PageDbErrorCode::NotFound
    }

    pub fn is_interrupted(&self) -> bool {
        self.code == PageDbErrorCode::Interrupted
    }
}

impl fmt::Display for PageDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " caused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for PageDbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for page storage operations
pub type PageDbResult<T> = Result<T, PageDbError>;
