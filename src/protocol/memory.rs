//! In-memory object store
//!
//! Behaves like a single S3 bucket closely enough to exercise the transfer
//! engine without a network: multipart uploads with S3-style ETags, version
//! ids, `If-Match` reads, SSE-C key checks and a minimum part size. Faults,
//! latency and mid-transfer overwrites can be injected, and every call is
//! recorded so tests can assert on what reached the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{CompletedPart, ObjectHead, ObjectStore, SourceVersion, StoreError, StoreResult};
use crate::transfer::encryption::{EncryptionContext, RequestKind};

/// Store operation, used for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Head,
    GetRange,
    Put,
    Initiate,
    UploadPart,
    Complete,
    Abort,
}

/// A call as seen by the store
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: StoreOp,
    pub key: String,
    /// Part number for part uploads, start offset for ranged reads
    pub target: Option<u64>,
    /// Encryption headers the request carried
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    version_id: Option<String>,
    customer_key_md5: Option<String>,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    customer_key_md5: Option<String>,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    target: Option<u64>,
    error: StoreError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    /// Every version of each key, oldest first
    objects: HashMap<String, Vec<StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
    next_id: u64,
    faults: Vec<Fault>,
    calls: Vec<RecordedCall>,
    overwrite: Option<(usize, String, Bytes)>,
    reads: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, op: StoreOp, target: Option<u64>) -> Option<StoreError> {
        let pos = self.faults.iter().position(|f| {
            f.op == op && f.remaining > 0 && (f.target.is_none() || f.target == target)
        })?;
        let fault = &mut self.faults[pos];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(pos);
        }
        Some(error)
    }
}

/// In-memory object store for tests and dry runs
///
/// # Example
///
/// ```rust
/// use parcel::protocol::{MemoryStore, ObjectStore, StoreOp};
/// use parcel::transfer::EncryptionContext;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert_object("docs/readme.txt", b"hello".to_vec());
///
/// let head = store
///     .head_object("docs/readme.txt", &EncryptionContext::None)
///     .await
///     .unwrap();
/// assert_eq!(head.size, 5);
/// assert_eq!(store.call_count(StoreOp::Head), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    versioned: bool,
    stable_handles: bool,
    min_part_size: u64,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks concurrent data-plane requests for the lifetime of one call
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

fn customer_md5(encryption: &EncryptionContext) -> Option<String> {
    encryption.customer().map(|k| k.key_md5_base64().to_string())
}

fn check_customer_key(expected: &Option<String>, encryption: &EncryptionContext) -> StoreResult<()> {
    if *expected == customer_md5(encryption) {
        Ok(())
    } else {
        Err(StoreError::InvalidRequest(
            "customer encryption key does not match the key the object was written with"
                .to_string(),
        ))
    }
}

impl MemoryStore {
    /// Unversioned store that reports ETags
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            versioned: false,
            stable_handles: true,
            min_part_size: 0,
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Assign a version id to every write
    pub fn with_versioning(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Report neither version ids nor ETags from HEAD
    pub fn without_stable_handles(mut self) -> Self {
        self.stable_handles = false;
        self
    }

    /// Reject non-final parts smaller than `bytes` at completion
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    /// Delay every data-plane request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_version(&self, state: &mut State, key: &str, data: Bytes, etag: String, md5: Option<String>) {
        let version_id = if self.versioned {
            Some(format!("v{:06}", state.next_id()))
        } else {
            None
        };
        let object = StoredObject {
            data,
            etag,
            version_id,
            customer_key_md5: md5,
        };
        let versions = state.objects.entry(key.to_string()).or_default();
        if !self.versioned {
            versions.clear();
        }
        versions.push(object);
    }

    /// Seed an object, replacing any current version
    pub fn insert_object(&self, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = quoted_md5(&data);
        let mut state = self.lock();
        self.store_version(&mut state, key, data, etag, None);
    }

    /// Seed an object encrypted with a customer key
    pub fn insert_encrypted_object(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        encryption: &EncryptionContext,
    ) {
        let data = data.into();
        let etag = quoted_md5(&data);
        let mut state = self.lock();
        self.store_version(&mut state, key, data, etag, customer_md5(encryption));
    }

    /// Current bytes of an object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(key)
            .and_then(|v| v.last())
            .map(|o| o.data.clone())
    }

    /// Current ETag of an object
    pub fn etag(&self, key: &str) -> Option<String> {
        self.lock()
            .objects
            .get(key)
            .and_then(|v| v.last())
            .map(|o| o.etag.clone())
    }

    /// Replace the object under `key` right after the `after_reads`-th ranged read
    pub fn schedule_overwrite(&self, after_reads: usize, key: &str, data: impl Into<Bytes>) {
        self.lock().overwrite = Some((after_reads, key.to_string(), data.into()));
    }

    /// Fail the next `times` calls of `op`
    pub fn fail(&self, op: StoreOp, error: StoreError, times: u32) {
        self.lock().faults.push(Fault {
            op,
            target: None,
            error,
            remaining: times,
        });
    }

    /// Fail the next `times` uploads of one part number
    pub fn fail_part(&self, part_number: i32, error: StoreError, times: u32) {
        self.lock().faults.push(Fault {
            op: StoreOp::UploadPart,
            target: u64::try_from(part_number).ok(),
            error,
            remaining: times,
        });
    }

    /// Fail the next `times` ranged reads starting at `start`
    pub fn fail_read_at(&self, start: u64, error: StoreError, times: u32) {
        self.lock().faults.push(Fault {
            op: StoreOp::GetRange,
            target: Some(start),
            error,
            remaining: times,
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Multipart uploads initiated but neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Highest number of part requests observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Record the call and return an injected fault, if any
    fn begin(
        &self,
        op: StoreOp,
        key: &str,
        target: Option<u64>,
        encryption: Option<(&EncryptionContext, RequestKind)>,
    ) -> StoreResult<()> {
        let headers = encryption
            .map(|(ctx, kind)| {
                ctx.headers(kind)
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect()
            })
            .unwrap_or_default();
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            op,
            key: key.to_string(),
            target,
            headers,
        });
        match state.take_fault(op, target) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(
        &self,
        key: &str,
        encryption: &EncryptionContext,
    ) -> StoreResult<ObjectHead> {
        self.begin(StoreOp::Head, key, None, Some((encryption, RequestKind::Read)))?;
        let state = self.lock();
        let current = state
            .objects
            .get(key)
            .and_then(|v| v.last())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_customer_key(&current.customer_key_md5, encryption)?;
        Ok(ObjectHead {
            size: current.data.len() as u64,
            version_id: current.version_id.clone().filter(|_| self.stable_handles),
            etag: Some(current.etag.clone()).filter(|_| self.stable_handles),
        })
    }

    async fn get_range(
        &self,
        key: &str,
        version: &SourceVersion,
        start: u64,
        end: u64,
        encryption: &EncryptionContext,
    ) -> StoreResult<Bytes> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.simulate_latency().await;
        self.begin(
            StoreOp::GetRange,
            key,
            Some(start),
            Some((encryption, RequestKind::Read)),
        )?;

        let mut state = self.lock();
        let body = {
            let versions = state
                .objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            let object = match version {
                SourceVersion::VersionId(id) => versions
                    .iter()
                    .find(|o| o.version_id.as_deref() == Some(id.as_str()))
                    .ok_or_else(|| StoreError::NotFound(format!("{}?versionId={}", key, id)))?,
                SourceVersion::ETag(etag) => {
                    let current = versions
                        .last()
                        .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
                    if current.etag != *etag {
                        return Err(StoreError::PreconditionFailed(format!(
                            "If-Match {} does not match {}",
                            etag, current.etag
                        )));
                    }
                    current
                }
                SourceVersion::Unpinned => versions
                    .last()
                    .ok_or_else(|| StoreError::NotFound(key.to_string()))?,
            };
            check_customer_key(&object.customer_key_md5, encryption)?;

            let len = object.data.len() as u64;
            if start > end || start >= len {
                return Err(StoreError::InvalidRequest(format!(
                    "InvalidRange: bytes={}-{} of {}",
                    start, end, len
                )));
            }
            let end = end.min(len - 1);
            object.data.slice(start as usize..=end as usize)
        };

        state.reads += 1;
        let due = matches!(&state.overwrite, Some((after, _, _)) if *after == state.reads);
        if due {
            if let Some((_, target, data)) = state.overwrite.take() {
                let etag = quoted_md5(&data);
                self.store_version(&mut state, &target, data, etag, None);
            }
        }
        Ok(body)
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.simulate_latency().await;
        self.begin(StoreOp::Put, key, None, Some((encryption, RequestKind::Create)))?;

        let etag = quoted_md5(&body);
        let mut state = self.lock();
        self.store_version(&mut state, key, body, etag.clone(), customer_md5(encryption));
        Ok(etag)
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        self.begin(
            StoreOp::Initiate,
            key,
            None,
            Some((encryption, RequestKind::Create)),
        )?;
        let mut state = self.lock();
        let upload_id = format!("upload-{:08x}", state.next_id());
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                customer_key_md5: customer_md5(encryption),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.simulate_latency().await;
        self.begin(
            StoreOp::UploadPart,
            key,
            u64::try_from(part_number).ok(),
            Some((encryption, RequestKind::Part)),
        )?;

        if !(1..=10_000).contains(&part_number) {
            return Err(StoreError::InvalidRequest(format!(
                "part number {} out of range",
                part_number
            )));
        }
        let mut state = self.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        check_customer_key(&upload.customer_key_md5, encryption)?;

        let etag = quoted_md5(&body);
        upload.parts.insert(part_number, (body, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        self.begin(
            StoreOp::Complete,
            key,
            None,
            Some((encryption, RequestKind::Part)),
        )?;

        let mut state = self.lock();
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        check_customer_key(&upload.customer_key_md5, encryption)?;

        if parts.is_empty() {
            return Err(StoreError::InvalidRequest(
                "MalformedXML: no parts to complete".to_string(),
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StoreError::InvalidRequest("InvalidPartOrder".to_string()));
        }

        let mut data = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for (i, part) in parts.iter().enumerate() {
            let (body, etag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::InvalidRequest(format!("InvalidPart: {} not uploaded", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(StoreError::InvalidRequest(format!(
                    "InvalidPart: tag mismatch for part {}",
                    part.part_number
                )));
            }
            let last = i + 1 == parts.len();
            if !last && (body.len() as u64) < self.min_part_size {
                return Err(StoreError::InvalidRequest(format!(
                    "EntityTooSmall: part {} is {} bytes",
                    part.part_number,
                    body.len()
                )));
            }
            digests.extend_from_slice(&md5::compute(body).0);
            data.extend_from_slice(body);
        }

        let etag = format!("\"{:x}-{}\"", md5::compute(&digests), parts.len());
        let md5 = upload.customer_key_md5.clone();
        state.uploads.remove(upload_id);
        self.store_version(&mut state, key, data.freeze(), etag.clone(), md5);
        Ok(etag)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.begin(StoreOp::Abort, key, None, None)?;
        let mut state = self.lock();
        match state.uploads.remove(upload_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NoSuchUpload(upload_id.to_string())),
        }
    }
}
