//! Multipart upload lifecycle
//!
//! ```text
//! NotStarted -> Initiated -> PartsInFlight -> Completing -> Completed
//!      \             \              \              \
//!       +-------------+--------------+--------------+--> Aborting -> Aborted
//! ```
//!
//! Once an upload id exists the upload is always finished one way or the
//! other: [`MultipartCoordinator::complete`] or
//! [`MultipartCoordinator::abort`]. Dropping a coordinator with an open
//! upload logs an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::encryption::EncryptionContext;
use super::retry::{with_retry, RetryPolicy};
use crate::error::{Result, TransferError};
use crate::protocol::{CompletedPart, ObjectStore};

/// Multipart upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    Initiated,
    PartsInFlight,
    Completing,
    Completed,
    Aborting,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Upload id plus the tags of finished parts, keyed by part index
#[derive(Debug)]
pub struct MultipartSession {
    upload_id: String,
    tags: Mutex<BTreeMap<usize, String>>,
}

impl MultipartSession {
    pub fn new(upload_id: String) -> Self {
        Self {
            upload_id,
            tags: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Record the tag of a finished part; each index may be recorded once
    pub fn record(&self, index: usize, tag: String) -> Result<()> {
        let mut tags = self
            .tags
            .lock()
            .map_err(|_| TransferError::State("multipart session lock poisoned".to_string()))?;
        if tags.contains_key(&index) {
            return Err(TransferError::State(format!(
                "part {} recorded twice in upload {}",
                index + 1,
                self.upload_id
            )));
        }
        tags.insert(index, tag);
        Ok(())
    }

    /// Number of recorded parts
    pub fn recorded(&self) -> usize {
        self.tags.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Ordered completion list
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        let tags = self
            .tags
            .lock()
            .map_err(|_| TransferError::State("multipart session lock poisoned".to_string()))?;
        tags.iter()
            .map(|(index, etag)| {
                let part_number = i32::try_from(index + 1).map_err(|_| {
                    TransferError::State(format!("part index {} out of range", index))
                })?;
                Ok(CompletedPart {
                    part_number,
                    etag: etag.clone(),
                })
            })
            .collect()
    }
}

/// Check that a completion list is `1..=expected`, in order, without gaps
/// or duplicates
pub fn validate_part_list(parts: &[CompletedPart], expected: usize) -> Result<()> {
    if parts.len() != expected {
        return Err(TransferError::IncompleteTransfer(format!(
            "{} of {} parts have completion tags",
            parts.len(),
            expected
        )));
    }
    for (i, part) in parts.iter().enumerate() {
        let want = i as i64 + 1;
        if i64::from(part.part_number) != want {
            return Err(TransferError::IncompleteTransfer(format!(
                "completion list position {} holds part {}, expected {}",
                i, part.part_number, want
            )));
        }
        if part.etag.is_empty() {
            return Err(TransferError::IncompleteTransfer(format!(
                "part {} has an empty completion tag",
                part.part_number
            )));
        }
    }
    Ok(())
}

/// Drives one multipart upload through its state machine
pub struct MultipartCoordinator {
    store: Arc<dyn ObjectStore>,
    key: String,
    encryption: Arc<EncryptionContext>,
    retry: RetryPolicy,
    state: UploadState,
    session: Option<Arc<MultipartSession>>,
}

impl MultipartCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        encryption: Arc<EncryptionContext>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            encryption,
            retry,
            state: UploadState::NotStarted,
            session: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> Option<Arc<MultipartSession>> {
        self.session.clone()
    }

    fn expect_state(&self, expected: UploadState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransferError::State(format!(
                "cannot {} multipart upload in state {}",
                action, self.state
            )))
        }
    }

    /// Obtain an upload id from the store
    pub async fn initiate(&mut self, cancel: &CancellationToken) -> Result<Arc<MultipartSession>> {
        self.expect_state(UploadState::NotStarted, "initiate")?;

        let upload_id = with_retry(&self.retry, cancel, "initiate multipart upload", || {
            self.store.initiate_multipart(&self.key, &self.encryption)
        })
        .await?;

        info!(key = %self.key, upload_id = %upload_id, encryption = %self.encryption, "multipart upload initiated");
        let session = Arc::new(MultipartSession::new(upload_id));
        self.session = Some(Arc::clone(&session));
        self.state = UploadState::Initiated;
        Ok(session)
    }

    /// Mark the start of part uploads
    pub fn begin_parts(&mut self) -> Result<()> {
        self.expect_state(UploadState::Initiated, "start parts of")?;
        self.state = UploadState::PartsInFlight;
        Ok(())
    }

    /// Submit the completion list once every part has a tag.
    ///
    /// The list is validated before the request, and the request is made
    /// exactly once. On error the caller is expected to [`abort`](Self::abort).
    pub async fn complete(&mut self, expected_parts: usize) -> Result<String> {
        self.expect_state(UploadState::PartsInFlight, "complete")?;
        let session = self
            .session
            .clone()
            .ok_or_else(|| TransferError::State("no multipart session".to_string()))?;

        let parts = session.completed_parts()?;
        validate_part_list(&parts, expected_parts)?;

        self.state = UploadState::Completing;
        let once = self.retry.no_retry();
        let etag = with_retry(&once, &CancellationToken::new(), "complete multipart upload", || {
            self.store.complete_multipart(
                &self.key,
                session.upload_id(),
                &parts,
                &self.encryption,
            )
        })
        .await?;

        self.state = UploadState::Completed;
        info!(key = %self.key, upload_id = %session.upload_id(), parts = parts.len(), "multipart upload completed");
        Ok(etag)
    }

    /// Release the store-side upload.
    ///
    /// Best effort: a failed abort is logged and returned for reporting, never
    /// raised. Without an upload id there is nothing to release.
    pub async fn abort(&mut self) -> Option<TransferError> {
        if self.state.is_terminal() {
            return None;
        }
        let Some(session) = self.session.clone() else {
            self.state = UploadState::Aborted;
            return None;
        };

        self.state = UploadState::Aborting;
        let once = self.retry.no_retry();
        let result = with_retry(&once, &CancellationToken::new(), "abort multipart upload", || {
            self.store.abort_multipart(&self.key, session.upload_id())
        })
        .await;
        self.state = UploadState::Aborted;

        match result {
            Ok(()) => {
                info!(key = %self.key, upload_id = %session.upload_id(), "multipart upload aborted");
                None
            }
            Err(e) => {
                let source = match e {
                    TransferError::Transient { source, .. }
                    | TransferError::Permanent { source, .. } => source,
                    other => crate::protocol::StoreError::Sdk(other.to_string()),
                };
                let failure = TransferError::AbortFailed {
                    upload_id: session.upload_id().to_string(),
                    source,
                };
                warn!(key = %self.key, error = %failure, "abort failed; upload may need lifecycle cleanup");
                Some(failure)
            }
        }
    }
}

impl Drop for MultipartCoordinator {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            if !self.state.is_terminal() {
                error!(
                    key = %self.key,
                    upload_id = %session.upload_id(),
                    state = %self.state,
                    "multipart upload dropped without complete or abort"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MemoryStore, StoreError, StoreOp};
    use bytes::Bytes;

    fn coordinator(store: &Arc<MemoryStore>) -> MultipartCoordinator {
        MultipartCoordinator::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            "big.bin",
            Arc::new(EncryptionContext::None),
            RetryPolicy::default(),
        )
    }

    async fn upload(store: &MemoryStore, session: &MultipartSession, index: usize, data: &'static [u8]) {
        let tag = store
            .upload_part(
                "big.bin",
                session.upload_id(),
                index as i32 + 1,
                Bytes::from_static(data),
                &EncryptionContext::None,
            )
            .await
            .unwrap();
        session.record(index, tag).unwrap();
    }

    #[test]
    fn test_session_rejects_duplicate_index() {
        let session = MultipartSession::new("u".to_string());
        session.record(0, "\"a\"".to_string()).unwrap();
        assert!(session.record(0, "\"b\"".to_string()).is_err());
        assert_eq!(session.recorded(), 1);
    }

    #[test]
    fn test_completed_parts_sorted_by_index() {
        let session = MultipartSession::new("u".to_string());
        session.record(2, "c".to_string()).unwrap();
        session.record(0, "a".to_string()).unwrap();
        session.record(1, "b".to_string()).unwrap();
        let numbers: Vec<i32> = session
            .completed_parts()
            .unwrap()
            .iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_validate_part_list() {
        let part = |n: i32| CompletedPart {
            part_number: n,
            etag: format!("\"{}\"", n),
        };
        assert!(validate_part_list(&[part(1), part(2)], 2).is_ok());
        assert!(validate_part_list(&[part(1), part(3)], 2).is_err());
        assert!(validate_part_list(&[part(1), part(1)], 2).is_err());
        assert!(validate_part_list(&[part(2), part(1)], 2).is_err());
        assert!(validate_part_list(&[part(1)], 2).is_err());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let mut coord = coordinator(&store);
        assert_eq!(coord.state(), UploadState::NotStarted);

        let session = coord.initiate(&CancellationToken::new()).await.unwrap();
        assert_eq!(coord.state(), UploadState::Initiated);
        coord.begin_parts().unwrap();

        upload(&store, &session, 1, b"world").await;
        upload(&store, &session, 0, b"hello ").await;

        let etag = coord.complete(2).await.unwrap();
        assert_eq!(coord.state(), UploadState::Completed);
        assert!(etag.ends_with("-2\""));
        assert_eq!(store.object("big.bin").unwrap(), Bytes::from_static(b"hello world"));
        assert!(coord.abort().await.is_none());
        assert_eq!(store.call_count(StoreOp::Abort), 0);
    }

    #[tokio::test]
    async fn test_gap_fails_before_network_call() {
        let store = Arc::new(MemoryStore::new());
        let mut coord = coordinator(&store);
        let session = coord.initiate(&CancellationToken::new()).await.unwrap();
        coord.begin_parts().unwrap();
        upload(&store, &session, 0, b"a").await;
        upload(&store, &session, 2, b"c").await;

        let err = coord.complete(3).await.unwrap_err();
        assert!(matches!(err, TransferError::IncompleteTransfer(_)));
        assert_eq!(store.call_count(StoreOp::Complete), 0);

        assert!(coord.abort().await.is_none());
        assert_eq!(coord.state(), UploadState::Aborted);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_illegal_transitions() {
        let store = Arc::new(MemoryStore::new());
        let mut coord = coordinator(&store);
        assert!(matches!(coord.begin_parts(), Err(TransferError::State(_))));
        assert!(matches!(coord.complete(1).await, Err(TransferError::State(_))));

        coord.initiate(&CancellationToken::new()).await.unwrap();
        assert!(coord.initiate(&CancellationToken::new()).await.is_err());
        assert!(coord.complete(1).await.is_err());
        coord.abort().await;
    }

    #[tokio::test]
    async fn test_abort_without_upload_id_makes_no_call() {
        let store = Arc::new(MemoryStore::new());
        store.fail(StoreOp::Initiate, StoreError::AccessDenied("denied".into()), 1);
        let mut coord = coordinator(&store);
        assert!(coord.initiate(&CancellationToken::new()).await.is_err());
        assert!(coord.abort().await.is_none());
        assert_eq!(store.call_count(StoreOp::Abort), 0);
    }

    #[tokio::test]
    async fn test_failed_abort_is_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        store.fail(StoreOp::Abort, StoreError::Network("down".into()), 5);
        let mut coord = coordinator(&store);
        coord.initiate(&CancellationToken::new()).await.unwrap();

        let failure = coord.abort().await;
        assert!(matches!(failure, Some(TransferError::AbortFailed { .. })));
        assert_eq!(coord.state(), UploadState::Aborted);
        assert_eq!(store.call_count(StoreOp::Abort), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_then_abort() {
        let store = Arc::new(MemoryStore::new());
        store.fail(StoreOp::Complete, StoreError::Network("reset".into()), 1);
        let mut coord = coordinator(&store);
        let session = coord.initiate(&CancellationToken::new()).await.unwrap();
        coord.begin_parts().unwrap();
        upload(&store, &session, 0, b"only").await;

        assert!(coord.complete(1).await.is_err());
        assert_eq!(coord.state(), UploadState::Completing);
        assert_eq!(store.call_count(StoreOp::Complete), 1);

        assert!(coord.abort().await.is_none());
        assert_eq!(store.open_uploads(), 0);
    }
}
