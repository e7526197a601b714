/*!
 * Object store abstraction consumed by the transfer engine
 *
 * The engine never talks to a concrete client. Every request goes through the
 * [`ObjectStore`] trait, and the handle is injected into a job as
 * `Arc<dyn ObjectStore>` and shared read-only by all part workers.
 */

pub mod error;
pub mod memory;

#[cfg(feature = "s3-native")]
pub mod s3;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;
use bytes::Bytes;

use crate::transfer::encryption::EncryptionContext;

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Object size in bytes
    pub size: u64,

    /// Version id, when the bucket is versioned
    pub version_id: Option<String>,

    /// Entity tag
    pub etag: Option<String>,
}

impl ObjectHead {
    /// Stable handle for pinning ranged reads to this exact write.
    ///
    /// A version id is preferred over an ETag because it survives overwrites.
    pub fn source_version(&self) -> SourceVersion {
        match (&self.version_id, &self.etag) {
            (Some(v), _) if !v.is_empty() && v != "null" => SourceVersion::VersionId(v.clone()),
            (_, Some(e)) if !e.is_empty() => SourceVersion::ETag(e.clone()),
            _ => SourceVersion::Unpinned,
        }
    }
}

/// Which write of a key a read is pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceVersion {
    /// Read this version id
    VersionId(String),
    /// Read with `If-Match: <etag>`
    ETag(String),
    /// Read whatever is current
    Unpinned,
}

impl SourceVersion {
    pub fn is_pinned(&self) -> bool {
        !matches!(self, SourceVersion::Unpinned)
    }
}

/// One entry of a multipart completion list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Tag returned by the part upload
    pub etag: String,
}

/// Request surface the transfer engine needs from an object store.
///
/// All methods operate on a single bucket chosen when the store is built.
/// `end` in [`get_range`](ObjectStore::get_range) is inclusive.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch size, version id and ETag of an object
    async fn head_object(&self, key: &str, encryption: &EncryptionContext)
        -> StoreResult<ObjectHead>;

    /// Read bytes `start..=end` of the pinned object version
    async fn get_range(
        &self,
        key: &str,
        version: &SourceVersion,
        start: u64,
        end: u64,
        encryption: &EncryptionContext,
    ) -> StoreResult<Bytes>;

    /// Store a whole object in one request and return its tag
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String>;

    /// Start a multipart upload and return its upload id
    async fn initiate_multipart(
        &self,
        key: &str,
        encryption: &EncryptionContext,
    ) -> StoreResult<String>;

    /// Upload one part and return its completion tag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String>;

    /// Assemble the uploaded parts and return the final object tag
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        encryption: &EncryptionContext,
    ) -> StoreResult<String>;

    /// Discard an in-progress multipart upload
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()>;
}
