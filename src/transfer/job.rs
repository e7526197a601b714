//! Transfer job orchestration
//!
//! A [`TransferJob`] owns everything about one transfer: the request, the
//! multipart session or staged download, and the part outcomes. It always
//! ends in exactly one [`TransferResult`], after cleanup has run.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::assembler::ChunkedDownloadAssembler;
use super::encryption::EncryptionContext;
use super::multipart::MultipartCoordinator;
use super::planner::{ByteRangePlanner, Strategy, StrategyOverride, TransferPlan};
use super::pool::{PartOutcome, WorkerPool};
use super::progress::ProgressReporter;
use super::retry::{with_retry, RetryPolicy};
use super::transport::PartTransporter;
use super::{TransferDirection, DEFAULT_CHUNK_SIZE, DEFAULT_SINGLE_SHOT_LIMIT, DEFAULT_WORKERS};
use crate::error::{Result, TransferError, EXIT_SUCCESS};
use crate::protocol::ObjectStore;

/// What to transfer and how
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    /// Upload source or download destination
    pub local_path: PathBuf,
    /// Object key in the store
    pub key: String,
    pub chunk_size: u64,
    pub workers: usize,
    pub strategy: StrategyOverride,
    pub encryption: EncryptionContext,
    pub retry: RetryPolicy,
    /// Cap on bytes a forced single-shot transfer may buffer
    pub single_shot_limit: u64,
}

impl TransferRequest {
    fn new(direction: TransferDirection, local_path: PathBuf, key: String) -> Self {
        Self {
            direction,
            local_path,
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            strategy: StrategyOverride::Auto,
            encryption: EncryptionContext::None,
            retry: RetryPolicy::default(),
            single_shot_limit: DEFAULT_SINGLE_SHOT_LIMIT,
        }
    }

    /// Upload a local file to `key`
    pub fn upload(local_path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self::new(TransferDirection::Upload, local_path.into(), key.into())
    }

    /// Download `key` to a local file
    pub fn download(key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self::new(TransferDirection::Download, local_path.into(), key.into())
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyOverride) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionContext) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_single_shot_limit(mut self, limit: u64) -> Self {
        self.single_shot_limit = limit;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(TransferError::InvalidConfiguration(
                "object key must not be empty".to_string(),
            ));
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(TransferError::InvalidConfiguration(
                "local path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn planner(&self) -> ByteRangePlanner {
        ByteRangePlanner::new(self.direction, self.chunk_size, self.workers)
            .with_single_shot_limit(self.single_shot_limit)
    }
}

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Succeeded,
    Failed,
    /// Cancelled by the caller; cleanup has run
    Aborted,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Succeeded => write!(f, "succeeded"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Single report produced by [`TransferJob::run`]
#[derive(Debug)]
pub struct TransferResult {
    pub operation_id: String,
    pub status: TransferStatus,
    pub direction: TransferDirection,
    pub key: String,
    /// Object size, when it was learned before the failure
    pub object_size: u64,
    /// Bytes moved by successful parts
    pub bytes_transferred: u64,
    pub strategy: Option<Strategy>,
    pub parts: usize,
    /// Tag of the stored object after an upload
    pub etag: Option<String>,
    pub duration: Duration,
    pub error: Option<TransferError>,
    /// Failed best-effort cleanup, reported alongside `error`
    pub cleanup_error: Option<TransferError>,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Succeeded
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(EXIT_SUCCESS, TransferError::exit_code)
    }

    /// Throughput in MiB/s
    pub fn throughput_mibps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / super::MIB as f64 / secs
        } else {
            0.0
        }
    }
}

/// Facts gathered during a run, kept when the run fails midway
#[derive(Debug, Default)]
struct RunState {
    object_size: u64,
    strategy: Option<Strategy>,
    parts: usize,
    bytes: u64,
    etag: Option<String>,
    cleanup_error: Option<TransferError>,
}

/// Shared per-part progress counter
#[derive(Clone)]
struct PartProgress {
    reporter: Option<ProgressReporter>,
    operation_id: Arc<str>,
    done: Arc<AtomicU64>,
    total: u64,
}

impl PartProgress {
    fn part_done(&self, outcome: &PartOutcome) {
        let done = self
            .done
            .fetch_add(outcome.bytes_transferred, Ordering::SeqCst)
            + outcome.bytes_transferred;
        if let Some(reporter) = &self.reporter {
            reporter.part_completed(
                &self.operation_id,
                outcome.index,
                outcome.bytes_transferred,
                done,
                self.total,
            );
        }
    }
}

/// One upload or download
pub struct TransferJob {
    operation_id: String,
    request: TransferRequest,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
}

impl TransferJob {
    pub fn new(request: TransferRequest, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            operation_id: format!("{:016x}", rand::random::<u64>()),
            request,
            store,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use an external cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the transfer to completion, failure or cancellation
    pub async fn run(self) -> TransferResult {
        let started = Instant::now();
        let mut state = RunState::default();

        info!(
            operation_id = %self.operation_id,
            direction = %self.request.direction,
            key = %self.request.key,
            local = %self.request.local_path.display(),
            encryption = %self.request.encryption,
            "transfer started"
        );

        let outcome = if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            match self.request.validate() {
                Err(e) => Err(e),
                Ok(()) => match self.request.direction {
                    TransferDirection::Upload => self.upload(&mut state).await,
                    TransferDirection::Download => self.download(&mut state).await,
                },
            }
        };

        self.finish(outcome, state, started.elapsed())
    }

    fn finish(&self, outcome: Result<()>, state: RunState, duration: Duration) -> TransferResult {
        let (status, error) = match outcome {
            Ok(()) => (TransferStatus::Succeeded, None),
            Err(TransferError::Cancelled) => (TransferStatus::Aborted, Some(TransferError::Cancelled)),
            Err(e) => (TransferStatus::Failed, Some(e)),
        };

        match &error {
            None => {
                info!(
                    operation_id = %self.operation_id,
                    bytes = state.bytes,
                    parts = state.parts,
                    duration_ms = duration.as_millis() as u64,
                    "transfer succeeded"
                );
                if let Some(reporter) = &self.progress {
                    reporter.transfer_completed(&self.operation_id, state.bytes, duration);
                }
            }
            Some(e) => {
                if status == TransferStatus::Aborted {
                    warn!(operation_id = %self.operation_id, bytes = state.bytes, "transfer cancelled");
                } else {
                    error!(operation_id = %self.operation_id, bytes = state.bytes, error = %e, "transfer failed");
                }
                if let Some(reporter) = &self.progress {
                    reporter.transfer_failed(&self.operation_id, e.to_string(), state.bytes);
                }
            }
        }

        TransferResult {
            operation_id: self.operation_id.clone(),
            status,
            direction: self.request.direction,
            key: self.request.key.clone(),
            object_size: state.object_size,
            bytes_transferred: state.bytes,
            strategy: state.strategy,
            parts: state.parts,
            etag: state.etag,
            duration,
            error,
            cleanup_error: state.cleanup_error,
        }
    }

    fn plan(&self, object_size: u64, state: &mut RunState) -> Result<TransferPlan> {
        state.object_size = object_size;
        let plan = self.request.planner().plan(object_size, self.request.strategy)?;
        state.strategy = Some(plan.strategy);
        state.parts = plan.part_count();

        info!(
            operation_id = %self.operation_id,
            size = object_size,
            strategy = %plan.strategy,
            parts = plan.part_count(),
            workers = plan.concurrency,
            "transfer planned"
        );
        if let Some(reporter) = &self.progress {
            reporter.transfer_started(
                &self.operation_id,
                &self.request.key,
                object_size,
                self.request.direction,
                plan.strategy,
                plan.part_count(),
            );
        }
        Ok(plan)
    }

    fn transporter(&self) -> PartTransporter {
        PartTransporter::new(
            Arc::clone(&self.store),
            &self.request.key,
            Arc::new(self.request.encryption.clone()),
            self.request.retry.clone(),
            self.cancel.clone(),
        )
    }

    fn part_progress(&self, total: u64) -> PartProgress {
        PartProgress {
            reporter: self.progress.clone(),
            operation_id: Arc::from(self.operation_id.as_str()),
            done: Arc::new(AtomicU64::new(0)),
            total,
        }
    }

    async fn upload(&self, state: &mut RunState) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.request.local_path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidConfiguration(format!(
                "{} is not a regular file",
                self.request.local_path.display()
            )));
        }

        let plan = self.plan(metadata.len(), state)?;
        let transporter = self.transporter();
        let progress = self.part_progress(plan.object_size);

        if plan.is_single_shot() {
            let part = single_part(&plan)?;
            let outcome = transporter.put_single(&self.request.local_path, part).await?;
            progress.part_done(&outcome);
            state.bytes = outcome.bytes_transferred;
            state.etag = outcome.completion_tag;
            return Ok(());
        }

        let mut coordinator = MultipartCoordinator::new(
            Arc::clone(&self.store),
            self.request.key.clone(),
            Arc::new(self.request.encryption.clone()),
            self.request.retry.clone(),
        );

        let session = match coordinator.initiate(&self.cancel).await {
            Ok(session) => session,
            Err(e) => {
                state.cleanup_error = coordinator.abort().await;
                return Err(e);
            }
        };
        if let Err(e) = coordinator.begin_parts() {
            state.cleanup_error = coordinator.abort().await;
            return Err(e);
        }

        let source = Arc::new(self.request.local_path.clone());
        let pool = WorkerPool::new(plan.concurrency, self.cancel.clone());
        let report = pool
            .run(plan.parts.clone(), |part, drain| {
                let transporter = transporter.with_cancellation(drain);
                let session = Arc::clone(&session);
                let source = Arc::clone(&source);
                let progress = progress.clone();
                async move {
                    let outcome = transporter.upload_part(&source, &session, part).await?;
                    progress.part_done(&outcome);
                    Ok(outcome)
                }
            })
            .await;
        state.bytes = report.bytes_transferred();

        let completed = match report.into_result() {
            Ok(_) => coordinator.complete(plan.part_count()).await,
            Err(e) => Err(e),
        };

        match completed {
            Ok(etag) => {
                state.etag = Some(etag);
                Ok(())
            }
            Err(e) => {
                state.cleanup_error = coordinator.abort().await;
                Err(e)
            }
        }
    }

    async fn download(&self, state: &mut RunState) -> Result<()> {
        let head = with_retry(&self.request.retry, &self.cancel, "head object", || {
            self.store
                .head_object(&self.request.key, &self.request.encryption)
        })
        .await?;

        let plan = self.plan(head.size, state)?;
        let assembler =
            ChunkedDownloadAssembler::create(&self.request.local_path, &head, plan.strategy)
                .await?;
        let transporter = self.transporter();
        let progress = self.part_progress(plan.object_size);
        let version = Arc::new(assembler.version().clone());
        let staging = assembler.staging();

        let outcomes = if plan.is_single_shot() {
            match single_part(&plan) {
                Ok(part) => transporter
                    .download_range(&version, part, &staging)
                    .await
                    .map(|outcome| {
                        progress.part_done(&outcome);
                        state.bytes = outcome.bytes_transferred;
                        vec![outcome]
                    }),
                Err(e) => Err(e),
            }
        } else {
            let pool = WorkerPool::new(plan.concurrency, self.cancel.clone());
            let report = pool
                .run(plan.parts.clone(), |part, drain| {
                    let transporter = transporter.with_cancellation(drain);
                    let version = Arc::clone(&version);
                    let staging = Arc::clone(&staging);
                    let progress = progress.clone();
                    async move {
                        let outcome = transporter.download_range(&version, part, &staging).await?;
                        progress.part_done(&outcome);
                        Ok(outcome)
                    }
                })
                .await;
            state.bytes = report.bytes_transferred();
            report.into_result()
        };
        drop(staging);

        match outcomes {
            Ok(outcomes) => {
                assembler.finalize(&outcomes).await?;
                Ok(())
            }
            Err(e) => {
                assembler.discard().await;
                Err(e)
            }
        }
    }
}

fn single_part(plan: &TransferPlan) -> Result<super::planner::Part> {
    plan.parts
        .first()
        .copied()
        .ok_or_else(|| TransferError::State("single-shot plan has no part".to_string()))
}
