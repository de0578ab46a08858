//! Storage engine error types
//!
//! Engines report failures as an [`EngineError`] carrying a structured
//! [`ErrorKind`]. Retry decisions are made on the kind, never on the message
//! text, so adapters for real databases must classify their native errors
//! (see [`ErrorKind::from_sqlstate`]).

use thiserror::Error;

/// Result type alias for storage engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Classification of a storage engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transaction could not be serialized against concurrent transactions
    SerializationFailure,
    /// The engine broke a lock cycle by aborting this transaction
    Deadlock,
    /// A statement ran longer than the configured statement timeout
    StatementTimeout,
    /// A write was attempted inside a read-only transaction
    ReadOnlyViolation,
    /// A savepoint name did not refer to a live savepoint
    UnknownSavepoint,
    /// A savepoint with the same name is already live in this transaction
    DuplicateSavepoint,
    /// A setting was applied after the first statement of the transaction
    InvalidSetting,
    /// Any other engine failure
    Other,
}

impl ErrorKind {
    /// Whether this failure is transient and the whole transaction may be retried
    pub fn is_conflict(&self) -> bool {
        matches!(self, ErrorKind::SerializationFailure | ErrorKind::Deadlock)
    }

    /// Map a SQLSTATE code to an error kind
    ///
    /// Unrecognized codes map to [`ErrorKind::Other`].
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40001" => ErrorKind::SerializationFailure,
            "40P01" => ErrorKind::Deadlock,
            "57014" => ErrorKind::StatementTimeout,
            "25006" => ErrorKind::ReadOnlyViolation,
            "3B001" => ErrorKind::UnknownSavepoint,
            "25001" => ErrorKind::InvalidSetting,
            _ => ErrorKind::Other,
        }
    }

    /// Stable lowercase name, used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SerializationFailure => "serialization_failure",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::StatementTimeout => "statement_timeout",
            ErrorKind::ReadOnlyViolation => "read_only_violation",
            ErrorKind::UnknownSavepoint => "unknown_savepoint",
            ErrorKind::DuplicateSavepoint => "duplicate_savepoint",
            ErrorKind::InvalidSetting => "invalid_setting",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a storage engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Structured classification
    pub kind: ErrorKind,
    /// Engine-provided detail
    pub message: String,
}

impl EngineError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Serialization failure
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailure, message)
    }

    /// Deadlock detected
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deadlock, message)
    }

    /// Unclassified engine failure
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Whether the failure is conflict-class (retryable)
    pub fn is_conflict(&self) -> bool {
        self.kind.is_conflict()
    }
}
