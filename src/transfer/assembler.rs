//! Download staging and reassembly
//!
//! Downloads never write to the destination path directly. Parts land at
//! their offsets in a pre-sized temporary file next to the destination, and
//! the file is renamed into place only after the byte count checks out. A
//! failed or cancelled download leaves the destination untouched.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::planner::Strategy;
use super::pool::PartOutcome;
use crate::error::{Result, TransferError};
use crate::protocol::{ObjectHead, SourceVersion};

/// Pre-sized temporary file that part workers write into
#[derive(Debug)]
pub struct StagedDestination {
    path: TempPath,
    size: u64,
    written: AtomicU64,
}

impl StagedDestination {
    /// Create a temporary file in `dir` sized to `size` bytes
    async fn create(dir: PathBuf, size: u64) -> Result<Self> {
        let path = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            let file = tempfile::Builder::new()
                .prefix(".parcel-")
                .suffix(".partial")
                .tempfile_in(&dir)?;
            file.as_file().set_len(size)?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|e| TransferError::State(format!("staging task failed: {}", e)))??;

        Ok(Self {
            path,
            size,
            written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Write `data` at `offset`; writes past the planned size are rejected
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<u64> {
        let len = data.len() as u64;
        if offset.saturating_add(len) > self.size {
            return Err(TransferError::IncompleteTransfer(format!(
                "write of {} bytes at offset {} overruns object size {}",
                len, offset, self.size
            )));
        }
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        self.written.fetch_add(len, Ordering::SeqCst);
        Ok(len)
    }
}

/// Owns the staged file and source pin of one download
#[derive(Debug)]
pub struct ChunkedDownloadAssembler {
    destination: PathBuf,
    object_size: u64,
    version: SourceVersion,
    staged: Arc<StagedDestination>,
}

impl ChunkedDownloadAssembler {
    /// Choose the read pin for a download.
    ///
    /// Chunked reads must all hit the same write of the key, so a source
    /// without a version id or ETag is refused. A single request is atomic
    /// on its own and may go unpinned.
    pub fn pin_source(head: &ObjectHead, strategy: Strategy) -> Result<SourceVersion> {
        let version = head.source_version();
        if strategy == Strategy::Chunked && !version.is_pinned() {
            return Err(TransferError::InconsistentSource(
                "store reported neither a version id nor an ETag; refusing to stitch ranges"
                    .to_string(),
            ));
        }
        Ok(version)
    }

    /// Pin the source and stage a pre-sized file next to `destination`
    pub async fn create(destination: &Path, head: &ObjectHead, strategy: Strategy) -> Result<Self> {
        let version = Self::pin_source(head, strategy)?;

        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;
        let staged = StagedDestination::create(dir, head.size).await?;
        debug!(
            staging = %staged.path().display(),
            size = head.size,
            "staged download destination"
        );

        Ok(Self {
            destination: destination.to_path_buf(),
            object_size: head.size,
            version,
            staged: Arc::new(staged),
        })
    }

    pub fn version(&self) -> &SourceVersion {
        &self.version
    }

    /// Shared handle for part workers
    pub fn staging(&self) -> Arc<StagedDestination> {
        Arc::clone(&self.staged)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Verify the byte count and rename the staged file into place
    pub async fn finalize(self, outcomes: &[PartOutcome]) -> Result<u64> {
        let reported: u64 = outcomes.iter().map(|o| o.bytes_transferred).sum();
        let written = self.staged.written();
        let on_disk = tokio::fs::metadata(self.staged.path()).await?.len();

        if reported != self.object_size || written != self.object_size || on_disk != self.object_size
        {
            let detail = format!(
                "expected {} bytes, parts reported {}, wrote {}, staged file is {}",
                self.object_size, reported, written, on_disk
            );
            self.discard().await;
            return Err(TransferError::IncompleteTransfer(detail));
        }

        let staged = Arc::try_unwrap(self.staged).map_err(|_| {
            TransferError::State("staged file still shared by a part worker".to_string())
        })?;
        staged
            .path
            .persist(&self.destination)
            .map_err(|e| TransferError::Io(e.error))?;

        info!(destination = %self.destination.display(), bytes = written, "download assembled");
        Ok(written)
    }

    /// Remove the staged file
    pub async fn discard(self) {
        match Arc::try_unwrap(self.staged) {
            Ok(staged) => {
                let path = staged.path().to_path_buf();
                if let Err(e) = staged.path.close() {
                    warn!(staging = %path.display(), error = %e, "failed to remove staged download");
                }
            }
            // Last clone to drop removes the file
            Err(shared) => drop(shared),
        }
    }
}
