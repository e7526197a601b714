//! Moves a single part between the local file and the store

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::assembler::StagedDestination;
use super::encryption::EncryptionContext;
use super::multipart::MultipartSession;
use super::planner::Part;
use super::pool::PartOutcome;
use super::retry::{with_retry, RetryPolicy};
use crate::error::{Result, TransferError};
use crate::protocol::{ObjectStore, SourceVersion, StoreError};

/// Performs one part's request with the job's encryption and retry policy.
///
/// Cheap to clone; every worker gets its own copy.
#[derive(Clone)]
pub struct PartTransporter {
    store: Arc<dyn ObjectStore>,
    key: Arc<str>,
    encryption: Arc<EncryptionContext>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl PartTransporter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: &str,
        encryption: Arc<EncryptionContext>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            key: Arc::from(key),
            encryption,
            retry,
            cancel,
        }
    }

    /// Same transporter, retrying under `cancel` instead
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Upload the whole object with one PUT
    pub async fn put_single(&self, source: &Path, part: Part) -> Result<PartOutcome> {
        let body = read_part(source, part).await?;
        let etag = with_retry(&self.retry, &self.cancel, "put object", || {
            self.store
                .put_object(&self.key, body.clone(), &self.encryption)
        })
        .await?;
        Ok(PartOutcome::uploaded(part.index, part.length, etag))
    }

    /// Upload one multipart part and record its tag in the session
    pub async fn upload_part(
        &self,
        source: &Path,
        session: &MultipartSession,
        part: Part,
    ) -> Result<PartOutcome> {
        let body = read_part(source, part).await?;
        let part_number = part.part_number();
        let context = format!("upload part {}", part_number);

        let etag = with_retry(&self.retry, &self.cancel, &context, || {
            self.store.upload_part(
                &self.key,
                session.upload_id(),
                part_number,
                body.clone(),
                &self.encryption,
            )
        })
        .await?;

        session.record(part.index, etag.clone())?;
        debug!(part = part_number, bytes = part.length, "part uploaded");
        Ok(PartOutcome::uploaded(part.index, part.length, etag))
    }

    /// Read one range of the pinned source and write it at its offset.
    ///
    /// An empty part is satisfied without a request.
    pub async fn download_range(
        &self,
        version: &SourceVersion,
        part: Part,
        sink: &StagedDestination,
    ) -> Result<PartOutcome> {
        let Some(end) = part.end_inclusive() else {
            return Ok(PartOutcome::downloaded(part.index, 0));
        };
        let context = format!("get bytes={}-{}", part.start, end);

        let body = with_retry(&self.retry, &self.cancel, &context, || async move {
            let body = self
                .store
                .get_range(&self.key, version, part.start, end, &self.encryption)
                .await?;
            if body.len() as u64 != part.length {
                return Err(StoreError::Network(format!(
                    "short body: expected {} bytes, got {}",
                    part.length,
                    body.len()
                )));
            }
            Ok(body)
        })
        .await?;

        let written = sink.write_at(part.start, &body).await?;
        debug!(part = part.index, bytes = written, "range downloaded");
        Ok(PartOutcome::downloaded(part.index, written))
    }
}

/// Read exactly `part.length` bytes at `part.start` of a local file
async fn read_part(source: &Path, part: Part) -> Result<Bytes> {
    let length = usize::try_from(part.length).map_err(|_| {
        TransferError::InvalidConfiguration(format!(
            "part of {} bytes does not fit in memory",
            part.length
        ))
    })?;
    let mut file = File::open(source).await?;
    file.seek(SeekFrom::Start(part.start)).await?;
    let mut buffer = BytesMut::zeroed(length);
    file.read_exact(&mut buffer).await?;
    Ok(buffer.freeze())
}
