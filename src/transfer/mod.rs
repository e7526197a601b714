//! Parallel chunked transfer engine
//!
//! A [`TransferJob`] plans a transfer with the [`ByteRangePlanner`], moves the
//! parts through a bounded [`WorkerPool`] using a [`PartTransporter`], and
//! finalizes through the [`MultipartCoordinator`] (uploads) or the
//! [`ChunkedDownloadAssembler`] (downloads).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use parcel::protocol::{MemoryStore, ObjectStore};
//! use parcel::transfer::{TransferJob, TransferRequest, MIB};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
//! let request = TransferRequest::upload("backup.tar", "archive/backup.tar")
//!     .with_chunk_size(8 * MIB)
//!     .with_workers(8);
//!
//! let result = TransferJob::new(request, store).run().await;
//! println!("{}: {} bytes", result.status, result.bytes_transferred);
//! # }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod assembler;
pub mod encryption;
pub mod job;
pub mod multipart;
pub mod planner;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod transport;

pub use assembler::{ChunkedDownloadAssembler, StagedDestination};
pub use encryption::{CustomerKey, EncryptionContext, RequestKind};
pub use job::{TransferJob, TransferRequest, TransferResult, TransferStatus};
pub use multipart::{MultipartCoordinator, MultipartSession, UploadState};
pub use planner::{ByteRangePlanner, Part, Strategy, StrategyOverride, TransferPlan};
pub use pool::{PartOutcome, PoolReport, WorkerPool};
pub use progress::{ProgressEvent, ProgressReporter};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use transport::PartTransporter;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Default chunk size (5 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * MIB;

/// Default number of part workers
pub const DEFAULT_WORKERS: usize = 4;

/// Smallest non-final multipart part the store accepts
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest single part (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * GIB;

/// Largest object a single PUT may create (5 GiB)
pub const MAX_SINGLE_PUT_SIZE: u64 = 5 * GIB;

/// Most parts a multipart upload may have
pub const MAX_PARTS: usize = 10_000;

/// Default cap on bytes a forced single-shot transfer buffers in memory
pub const DEFAULT_SINGLE_SHOT_LIMIT: u64 = 512 * MIB;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Local file to object store
    Upload,
    /// Object store to local file
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "Upload"),
            TransferDirection::Download => write!(f, "Download"),
        }
    }
}
