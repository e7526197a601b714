//! Bounded worker pool for part transfers
//!
//! Parts are submitted in index order and at most `concurrency` run at once.
//! On the first failure, or when the cancellation token fires, the pool stops
//! submitting and waits for every in-flight part before returning, so no part
//! task outlives [`WorkerPool::run`]. Each part receives a child of the job
//! token that is also cancelled on the first failure, which cuts short the
//! retry backoff of parts still in flight.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::planner::Part;
use crate::error::{Result, TransferError};

/// Result of one executed part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    /// 0-based part index
    pub index: usize,
    /// Bytes moved by this part
    pub bytes_transferred: u64,
    /// Tag returned by the store for an uploaded part
    pub completion_tag: Option<String>,
    /// Failure detail, `None` on success
    pub failure: Option<String>,
}

impl PartOutcome {
    pub fn uploaded(index: usize, bytes: u64, tag: String) -> Self {
        Self {
            index,
            bytes_transferred: bytes,
            completion_tag: Some(tag),
            failure: None,
        }
    }

    pub fn downloaded(index: usize, bytes: u64) -> Self {
        Self {
            index,
            bytes_transferred: bytes,
            completion_tag: None,
            failure: None,
        }
    }

    pub fn failed(index: usize, error: &TransferError) -> Self {
        Self {
            index,
            bytes_transferred: 0,
            completion_tag: None,
            failure: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything the pool observed during one run
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Outcomes of executed parts, sorted by index
    pub outcomes: Vec<PartOutcome>,
    /// First failure in completion order
    pub first_error: Option<TransferError>,
    /// Submission stopped because of cancellation
    pub cancelled: bool,
    /// Parts never submitted
    pub skipped: usize,
}

impl PoolReport {
    pub fn is_success(&self) -> bool {
        self.first_error.is_none() && !self.cancelled && self.skipped == 0
    }

    /// Bytes moved by successful parts
    pub fn bytes_transferred(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.bytes_transferred)
            .sum()
    }

    /// Ordered successful outcomes, or the error that stopped the run
    pub fn into_result(self) -> Result<Vec<PartOutcome>> {
        if let Some(error) = self.first_error {
            return Err(error);
        }
        if self.cancelled {
            return Err(TransferError::Cancelled);
        }
        if self.skipped > 0 {
            return Err(TransferError::State(format!(
                "{} part(s) were never executed",
                self.skipped
            )));
        }
        Ok(self.outcomes)
    }
}

/// Runs part transfers with bounded concurrency
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// A concurrency of zero is treated as one
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute `transport` for every part.
    ///
    /// `transport` is called on the pool's task to build each part's future;
    /// the future itself runs on a spawned task. The token handed to it fires
    /// on job cancellation or on the first part failure.
    pub async fn run<F, Fut>(&self, parts: Vec<Part>, transport: F) -> PoolReport
    where
        F: Fn(Part, CancellationToken) -> Fut,
        Fut: Future<Output = Result<PartOutcome>> + Send + 'static,
    {
        let total = parts.len();
        let mut queue = parts.into_iter();
        let mut tasks = JoinSet::new();
        let mut report = PoolReport::default();
        let mut submitted = 0usize;
        let mut stopped = false;
        let drain = self.cancel.child_token();

        loop {
            while !stopped && tasks.len() < self.concurrency {
                if self.cancel.is_cancelled() {
                    debug!(in_flight = tasks.len(), "cancellation requested, draining");
                    report.cancelled = true;
                    stopped = true;
                    break;
                }
                let Some(part) = queue.next() else { break };
                let index = part.index;
                let work = transport(part, drain.clone());
                tasks.spawn(async move { (index, work.await) });
                submitted += 1;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((_, Ok(outcome))) => report.outcomes.push(outcome),
                Ok((index, Err(error))) => {
                    if !stopped {
                        warn!(part = index, error = %error, "part failed, draining in-flight parts");
                    }
                    report.outcomes.push(PartOutcome::failed(index, &error));
                    if report.first_error.is_none() {
                        report.first_error = Some(error);
                    }
                    stopped = true;
                    drain.cancel();
                }
                Err(join_error) => {
                    if report.first_error.is_none() {
                        report.first_error = Some(TransferError::State(format!(
                            "part worker did not finish: {}",
                            join_error
                        )));
                    }
                    stopped = true;
                    drain.cancel();
                }
            }
        }

        report.skipped = total - submitted;
        report.outcomes.sort_by_key(|o| o.index);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn parts(n: usize) -> Vec<Part> {
        (0..n)
            .map(|i| Part {
                index: i,
                start: i as u64 * 10,
                length: 10,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_outcomes_sorted_despite_completion_order() {
        let pool = WorkerPool::new(4, CancellationToken::new());
        let report = pool
            .run(parts(8), |part, _| async move {
                // Later parts finish first
                tokio::time::sleep(Duration::from_millis(40 - part.index as u64 * 5)).await;
                Ok(PartOutcome::downloaded(part.index, part.length))
            })
            .await;

        assert!(report.is_success());
        let order: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        assert_eq!(report.bytes_transferred(), 80);
    }

    #[tokio::test]
    async fn test_never_exceeds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3, CancellationToken::new());

        let report = pool
            .run(parts(20), |part, _| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(PartOutcome::downloaded(part.index, part.length))
                }
            })
            .await;

        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failure_stops_submission_and_drains() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2, CancellationToken::new());

        let report = pool
            .run(parts(10), |part, _| {
                let started = Arc::clone(&started);
                let finished = Arc::clone(&finished);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if part.index == 1 {
                        return Err(TransferError::IncompleteTransfer("boom".into()));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(PartOutcome::downloaded(part.index, part.length))
                }
            })
            .await;

        assert!(!report.is_success());
        assert!(matches!(
            report.first_error,
            Some(TransferError::IncompleteTransfer(_))
        ));
        // Part 0 was in flight when part 1 failed and must have been awaited
        assert_eq!(finished.load(Ordering::SeqCst), started.load(Ordering::SeqCst) - 1);
        assert!(report.skipped >= 7);
        assert_eq!(
            report.outcomes.iter().filter(|o| !o.is_success()).count(),
            1
        );
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = WorkerPool::new(4, cancel);
        let report = pool
            .run(parts(3), |part, _| async move {
                Ok(PartOutcome::downloaded(part.index, part.length))
            })
            .await;

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.skipped, 3);
        assert!(matches!(report.into_result(), Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_drains_in_flight() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(2, cancel.clone());
        let report = pool
            .run(parts(10), |part, _| {
                let cancel = cancel.clone();
                async move {
                    if part.index == 1 {
                        cancel.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(PartOutcome::downloaded(part.index, part.length))
                }
            })
            .await;

        assert!(report.cancelled);
        assert!(report.first_error.is_none());
        assert!(report.outcomes.iter().all(|o| o.is_success()));
        assert!(report.outcomes.len() < 10);
        assert_eq!(report.outcomes.len() + report.skipped, 10);
    }

    #[tokio::test]
    async fn test_zero_concurrency_treated_as_one() {
        let pool = WorkerPool::new(0, CancellationToken::new());
        assert_eq!(pool.concurrency(), 1);
        let report = pool
            .run(parts(2), |part, _| async move {
                Ok(PartOutcome::downloaded(part.index, part.length))
            })
            .await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_first_failure_cuts_sibling_backoff_short() {
        let job_token = CancellationToken::new();
        let pool = WorkerPool::new(2, job_token.clone());
        let started = std::time::Instant::now();

        let report = pool
            .run(parts(2), |part, token| async move {
                if part.index == 1 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    return Err(TransferError::IncompleteTransfer("short read".into()));
                }
                // Stands in for a long retry backoff
                tokio::select! {
                    _ = token.cancelled() => Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        Ok(PartOutcome::downloaded(part.index, part.length))
                    }
                }
            })
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            report.first_error,
            Some(TransferError::IncompleteTransfer(_))
        ));
        assert!(!report.cancelled);
        assert!(!job_token.is_cancelled());
        assert_eq!(report.outcomes.len(), 2);
    }
}
