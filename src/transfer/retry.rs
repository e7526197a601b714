//! Per-request retry policy
//!
//! Every store call made by the engine goes through [`with_retry`]: each
//! attempt is bounded by the policy's request timeout, transient failures are
//! retried with backoff, and non-retryable failures return immediately.
//!
//! ```no_run
//! use parcel::transfer::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_retries: 5,
//!     initial_delay: Duration::from_millis(100),
//!     backoff: BackoffStrategy::Exponential,
//!     ..Default::default()
//! };
//! assert_eq!(policy.max_attempts(), 6);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::protocol::{StoreError, StoreResult};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff: BackoffStrategy,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,

    /// Upper bound on a single attempt
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: 0.3,
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// One attempt, same timeout
    pub fn no_retry(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate delay before the given retry (1-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let base_delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(retry),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialWithJitter => {
                let multiplier = 2_u32.saturating_pow(retry - 1);
                self.initial_delay.saturating_mul(multiplier)
            }
        };

        let capped_delay = base_delay.min(self.max_delay);

        if matches!(self.backoff, BackoffStrategy::ExponentialWithJitter)
            && self.jitter_factor > 0.0
        {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor.min(1.0));
            capped_delay + Duration::from_secs_f64(capped_delay.as_secs_f64() * jitter)
        } else {
            capped_delay
        }
    }
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential increase in delay (2^n)
    Exponential,

    /// Exponential with random jitter to prevent thundering herd
    ExponentialWithJitter,
}

/// Run `operation` under `policy`.
///
/// `context` names the request in logs and in the returned error. A cancelled
/// token stops further retries but never interrupts an attempt in flight.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    context: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match timeout(policy.request_timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(context, attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(_) => StoreError::Timeout(format!(
                "no response within {:?}",
                policy.request_timeout
            )),
        };

        if !error.is_retryable() || attempt >= policy.max_attempts() {
            return Err(TransferError::from_store(context, error, attempt));
        }

        let delay = policy.calculate_delay(attempt);
        warn!(
            context,
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "transient failure, retrying"
        );

        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        }
    }
}
