//! Progress events for transfer jobs
//!
//! A job reports through a [`ProgressReporter`]; the receiving half is an
//! unbounded tokio channel so workers never block on a slow consumer.
//!
//! ```no_run
//! use parcel::transfer::progress::{ProgressEvent, ProgressReporter};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (reporter, mut receiver) = ProgressReporter::new();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = receiver.recv().await {
//!         if let ProgressEvent::Progress { percentage, .. } = event {
//!             println!("{:.1}%", percentage);
//!         }
//!     }
//! });
//! # drop(reporter);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::planner::Strategy;
use super::TransferDirection;

/// Progress event for a transfer job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Plan is ready and parts are about to move
    TransferStarted {
        /// Job identifier
        operation_id: String,
        /// Object key
        key: String,
        /// Total bytes to transfer
        total_bytes: u64,
        /// Transfer direction
        direction: TransferDirection,
        /// Planned strategy
        strategy: Strategy,
        /// Number of parts
        parts: usize,
    },

    /// One part finished
    PartCompleted {
        operation_id: String,
        /// 0-based part index
        index: usize,
        /// Bytes in this part
        bytes: u64,
    },

    /// Running total after a part finished
    Progress {
        operation_id: String,
        bytes_transferred: u64,
        total_bytes: u64,
        /// Percentage complete (0-100)
        percentage: f64,
    },

    /// Transfer completed successfully
    TransferCompleted {
        operation_id: String,
        total_bytes: u64,
        duration: Duration,
    },

    /// Transfer failed or was cancelled
    TransferFailed {
        operation_id: String,
        error: String,
        bytes_transferred: u64,
    },
}

/// Sender half of the progress channel
#[derive(Clone)]
pub struct ProgressReporter {
    sender: Arc<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Report a progress event
    pub fn report(&self, event: ProgressEvent) {
        // Receiver may already be gone
        let _ = self.sender.send(event);
    }

    pub fn transfer_started(
        &self,
        operation_id: &str,
        key: &str,
        total_bytes: u64,
        direction: TransferDirection,
        strategy: Strategy,
        parts: usize,
    ) {
        self.report(ProgressEvent::TransferStarted {
            operation_id: operation_id.to_string(),
            key: key.to_string(),
            total_bytes,
            direction,
            strategy,
            parts,
        });
    }

    /// Report a finished part together with the new running total
    pub fn part_completed(
        &self,
        operation_id: &str,
        index: usize,
        bytes: u64,
        bytes_transferred: u64,
        total_bytes: u64,
    ) {
        self.report(ProgressEvent::PartCompleted {
            operation_id: operation_id.to_string(),
            index,
            bytes,
        });

        let percentage = if total_bytes > 0 {
            (bytes_transferred as f64 / total_bytes as f64) * 100.0
        } else {
            100.0
        };
        self.report(ProgressEvent::Progress {
            operation_id: operation_id.to_string(),
            bytes_transferred,
            total_bytes,
            percentage,
        });
    }

    pub fn transfer_completed(&self, operation_id: &str, total_bytes: u64, duration: Duration) {
        self.report(ProgressEvent::TransferCompleted {
            operation_id: operation_id.to_string(),
            total_bytes,
            duration,
        });
    }

    pub fn transfer_failed(&self, operation_id: &str, error: String, bytes_transferred: u64) {
        self.report(ProgressEvent::TransferFailed {
            operation_id: operation_id.to_string(),
            error,
            bytes_transferred,
        });
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        let (sender, _) = unbounded_channel();
        Self {
            sender: Arc::new(sender),
        }
    }
}
