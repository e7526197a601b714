//! Error types for object store operations

use std::io;
use thiserror::Error;

/// Result type alias for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by an [`ObjectStore`](super::ObjectStore) call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Service error with specific error code
    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },

    /// 5xx response whose error code is not otherwise recognized
    #[error("Server error {status} ({code}): {message}")]
    ServerError {
        status: u16,
        code: String,
        message: String,
    },

    /// Object or bucket not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// `If-Match` or version pin no longer matches the stored object
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Request rejected as malformed (bad part size, wrong SSE-C key, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown or already finished multipart upload
    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Client-side SDK failure that fits no other category
    #[error("SDK error: {0}")]
    Sdk(String),
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network(_) => true,
            StoreError::Timeout(_) => true,
            StoreError::RateLimitExceeded(_) => true,
            StoreError::Io(_) => true,
            StoreError::Service { code, .. } => is_retryable_code(code),
            StoreError::ServerError { .. } => true,
            StoreError::Sdk(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("connection refused")
                    || lower.contains("temporarily unavailable")
            }
            _ => false,
        }
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed(_))
    }

    /// Build an error from a service error code and HTTP status.
    ///
    /// HEAD responses carry no body, so the status is the only signal there.
    pub fn from_service(status: u16, code: &str, message: &str) -> Self {
        let message = if message.is_empty() {
            code.to_string()
        } else {
            message.to_string()
        };
        match code {
            "NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchVersion" => {
                StoreError::NotFound(message)
            }
            "AccessDenied" | "AllAccessDisabled" => StoreError::AccessDenied(message),
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken" => {
                StoreError::Authentication(message)
            }
            "PreconditionFailed" => StoreError::PreconditionFailed(message),
            "NoSuchUpload" => StoreError::NoSuchUpload(message),
            "SlowDown" | "Throttling" | "TooManyRequests" => StoreError::RateLimitExceeded(message),
            "InvalidRequest" | "InvalidArgument" | "EntityTooSmall" | "EntityTooLarge"
            | "InvalidPart" | "InvalidPartOrder" | "InvalidRange" => {
                StoreError::InvalidRequest(message)
            }
            _ => match status {
                404 => StoreError::NotFound(message),
                403 => StoreError::AccessDenied(message),
                401 => StoreError::Authentication(message),
                412 => StoreError::PreconditionFailed(message),
                429 => StoreError::RateLimitExceeded(message),
                500..=599 if !is_retryable_code(code) => StoreError::ServerError {
                    status,
                    code: if code.is_empty() {
                        status.to_string()
                    } else {
                        code.to_string()
                    },
                    message,
                },
                _ => StoreError::Service {
                    code: if code.is_empty() {
                        status.to_string()
                    } else {
                        code.to_string()
                    },
                    message,
                },
            },
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Check if a service error code (or bare HTTP status) is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
            | "500"
            | "502"
            | "503"
            | "504"
    )
}

#[cfg(feature = "s3-native")]
impl<E> From<aws_sdk_s3::error::SdkError<E>> for StoreError
where
    E: aws_sdk_s3::error::ProvideErrorMetadata + std::error::Error + 'static,
{
    fn from(error: aws_sdk_s3::error::SdkError<E>) -> Self {
        use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};

        match error {
            SdkError::TimeoutError(e) => StoreError::Timeout(format!("{:?}", e)),
            SdkError::DispatchFailure(e) => {
                if e.is_timeout() {
                    StoreError::Timeout(format!("Dispatch timed out: {:?}", e))
                } else {
                    StoreError::Network(format!("Network dispatch failure: {:?}", e))
                }
            }
            SdkError::ResponseError(e) => StoreError::Network(format!("Response error: {:?}", e)),
            SdkError::ServiceError(ctx) => {
                let status = ctx.raw().status().as_u16();
                let err = ctx.err();
                StoreError::from_service(
                    status,
                    err.code().unwrap_or_default(),
                    err.message().unwrap_or_default(),
                )
            }
            other => StoreError::Sdk(other.to_string()),
        }
    }
}
