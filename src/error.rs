/*!
 * Error types for parcel
 */

use std::io;

use thiserror::Error;

use crate::protocol::StoreError;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

/// Terminal error of a transfer job.
///
/// Part-level transient failures are retried inside the transporter and never
/// surface individually; a job reports at most one of these.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Bad planner inputs, bad encryption parameters, unusable strategy
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Retryable store failure that exhausted the retry budget
    #[error("{context} failed after {attempts} attempt(s): {source}")]
    Transient {
        context: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Store failure that is never retried (auth, permission, not found)
    #[error("{context}: {source}")]
    Permanent {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Source object changed, or cannot be pinned, during a download
    #[error("Inconsistent source: {0}")]
    InconsistentSource(String),

    /// Assembled byte count or part list does not match the plan
    #[error("Incomplete transfer: {0}")]
    IncompleteTransfer(String),

    /// Best-effort multipart abort failed
    #[error("Failed to abort multipart upload {upload_id}: {source}")]
    AbortFailed {
        upload_id: String,
        #[source]
        source: StoreError,
    },

    /// Illegal multipart state transition or broken internal bookkeeping
    #[error("Invalid transfer state: {0}")]
    State(String),

    /// Caller cancelled the job
    #[error("Transfer cancelled")]
    Cancelled,

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse grouping used for exit codes and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Permanent,
    Integrity,
    Cleanup,
    Cancelled,
    Internal,
    Io,
}

impl TransferError {
    /// Classify a store failure once retries have been decided.
    ///
    /// A failed precondition means the pinned version or ETag no longer
    /// matches, which is a consistency problem rather than a store fault.
    pub fn from_store(context: impl Into<String>, error: StoreError, attempts: u32) -> Self {
        let context = context.into();
        if error.is_precondition_failed() {
            return TransferError::InconsistentSource(format!("{}: {}", context, error));
        }
        if error.is_retryable() {
            TransferError::Transient {
                context,
                attempts,
                source: error,
            }
        } else {
            TransferError::Permanent {
                context,
                source: error,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidConfiguration(_) => ErrorKind::Configuration,
            TransferError::Transient { .. } => ErrorKind::Transient,
            TransferError::Permanent { .. } => ErrorKind::Permanent,
            TransferError::InconsistentSource(_) | TransferError::IncompleteTransfer(_) => {
                ErrorKind::Integrity
            }
            TransferError::AbortFailed { .. } => ErrorKind::Cleanup,
            TransferError::State(_) => ErrorKind::Internal,
            TransferError::Cancelled => ErrorKind::Cancelled,
            TransferError::Io(_) => ErrorKind::Io,
        }
    }

    /// Get the structured exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration | ErrorKind::Permanent => EXIT_FATAL,
            ErrorKind::Integrity => EXIT_INTEGRITY,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (rerunning the same request will not help)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Permanent | ErrorKind::Integrity
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_failure_maps_to_inconsistent_source() {
        let err = TransferError::from_store(
            "get bytes=0-9",
            StoreError::PreconditionFailed("etag changed".to_string()),
            1,
        );
        assert!(matches!(err, TransferError::InconsistentSource(_)));
        assert_eq!(err.exit_code(), EXIT_INTEGRITY);
    }

    #[test]
    fn test_retryable_store_error_becomes_transient() {
        let err = TransferError::from_store(
            "upload part 3",
            StoreError::Network("connection reset".to_string()),
            4,
        );
        match &err {
            TransferError::Transient { attempts, .. } => assert_eq!(*attempts, 4),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!err.is_fatal());
        assert_eq!(err.exit_code(), EXIT_PARTIAL);
        assert!(err.to_string().contains("after 4 attempt(s)"));
    }

    #[test]
    fn test_auth_error_becomes_permanent() {
        let err = TransferError::from_store(
            "head",
            StoreError::AccessDenied("bucket policy".to_string()),
            1,
        );
        assert!(matches!(err, TransferError::Permanent { .. }));
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            TransferError::InvalidConfiguration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(TransferError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            TransferError::IncompleteTransfer("short".into()).exit_code(),
            EXIT_INTEGRITY
        );
        let io_err: TransferError = io::Error::new(io::ErrorKind::Other, "disk").into();
        assert_eq!(io_err.kind(), ErrorKind::Io);
    }
}
