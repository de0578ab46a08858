//! Transaction error types
//!
//! [`TxnError`] is what units of work, the coordinator, the batch executor and
//! the savepoint controller all return. Retry decisions go through
//! [`TxnError::is_conflict`], which looks at the structured engine
//! [`ErrorKind`] and never at message text.

use courier_core::{EngineError, ErrorKind};
use thiserror::Error;

/// Result type alias for transactional operations
pub type TxnResult<T> = std::result::Result<T, TxnError>;

/// Generic text shown to end users for any transactional failure
pub const USER_FACING_MESSAGE: &str = "operation failed, please retry";

/// Failure of a transactional operation
#[derive(Debug, Error)]
pub enum TxnError {
    /// The storage engine reported a failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The unit of work chose to fail
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Caller-supplied reason
        reason: String,
    },

    /// A savepoint operation failed
    #[error("savepoint {name} failed: {source}")]
    Savepoint {
        /// Savepoint the operation targeted
        name: String,
        /// Engine failure
        #[source]
        source: EngineError,
    },

    /// A savepoint name is not a valid SQL identifier
    #[error("invalid savepoint name {name:?}: {reason}")]
    InvalidSavepointName {
        /// Rejected name
        name: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// A batch step failed; the whole batch was rolled back
    #[error("batch step {index} failed: {source}")]
    BatchStep {
        /// Zero-based position of the failing step
        index: usize,
        /// What the step returned
        #[source]
        source: Box<TxnError>,
    },

    /// Every attempt failed with a conflict
    #[error("transaction failed after {retries} retries: {source}")]
    RetriesExhausted {
        /// Retries performed (attempts minus one)
        retries: u32,
        /// Failure of the last attempt
        #[source]
        source: Box<TxnError>,
    },
}

impl TxnError {
    /// Unit of work abort with a reason
    pub fn aborted(reason: impl Into<String>) -> Self {
        TxnError::Aborted {
            reason: reason.into(),
        }
    }

    /// Whether the failure is transient and the whole transaction may be retried
    ///
    /// Batch step failures keep the classification of the step's own error.
    /// Savepoint failures and exhausted retries are never retryable.
    pub fn is_conflict(&self) -> bool {
        match self {
            TxnError::Engine(e) => e.is_conflict(),
            TxnError::BatchStep { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Engine error kind at the root of this failure, if any
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TxnError::Engine(e) | TxnError::Savepoint { source: e, .. } => Some(e.kind),
            TxnError::BatchStep { source, .. } | TxnError::RetriesExhausted { source, .. } => {
                source.kind()
            }
            TxnError::Aborted { .. } | TxnError::InvalidSavepointName { .. } => None,
        }
    }

    /// Text safe to show an end user
    ///
    /// Internal detail stays in logs.
    pub fn user_message(&self) -> &'static str {
        USER_FACING_MESSAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_conflict_is_retryable() {
        let err = TxnError::from(EngineError::serialization("write skew"));
        assert!(err.is_conflict());
        assert_eq!(err.kind(), Some(ErrorKind::SerializationFailure));

        let err = TxnError::from(EngineError::other("disk full"));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_batch_step_preserves_classification() {
        let conflict = TxnError::BatchStep {
            index: 2,
            source: Box::new(EngineError::deadlock("cycle").into()),
        };
        assert!(conflict.is_conflict());
        assert_eq!(conflict.kind(), Some(ErrorKind::Deadlock));
        assert!(conflict.to_string().contains("batch step 2"));

        let plain = TxnError::BatchStep {
            index: 0,
            source: Box::new(TxnError::aborted("bad input")),
        };
        assert!(!plain.is_conflict());
        assert_eq!(plain.kind(), None);
    }

    #[test]
    fn test_savepoint_failure_never_retried() {
        let err = TxnError::Savepoint {
            name: "sp_1".to_string(),
            source: EngineError::serialization("doomed"),
        };
        assert!(!err.is_conflict());
        assert_eq!(err.kind(), Some(ErrorKind::SerializationFailure));
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = TxnError::RetriesExhausted {
            retries: 3,
            source: Box::new(EngineError::deadlock("cycle").into()),
        };
        assert!(!err.is_conflict());
        assert!(err
            .to_string()
            .starts_with("transaction failed after 3 retries"));
        assert_eq!(err.user_message(), "operation failed, please retry");
    }
}
