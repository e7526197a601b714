/*!
 * Parcel - parallel chunked transfers for S3-compatible object stores
 *
 * Moves a single large object between the local filesystem and a bucket
 * by splitting it into byte ranges and running them concurrently:
 * - Multipart uploads with guaranteed abort on failure or cancellation
 * - Ranged, version-pinned downloads assembled into a staged file
 * - Bounded worker pool with cooperative cancellation
 * - Per-request retry with exponential backoff and jitter
 * - SSE-S3, SSE-KMS and SSE-C applied uniformly to every request
 */

pub mod cli_progress;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transfer;

// Re-export commonly used types
pub use config::{LogLevel, StoreSettings, TransferConfig};
pub use error::{Result, TransferError};
pub use protocol::{MemoryStore, ObjectStore, StoreError};
pub use transfer::{
    EncryptionContext, Strategy, StrategyOverride, TransferJob, TransferRequest, TransferResult,
    TransferStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
