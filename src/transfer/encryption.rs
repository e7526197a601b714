//! Server-side encryption parameters for one transfer
//!
//! An [`EncryptionContext`] is validated when it is built and then shared,
//! unchanged, by every request of a job. Customer-provided keys derive their
//! base64 form and MD5 digest exactly once so every part presents the same
//! values to the store.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, TransferError};

/// Required customer key length for SSE-C (AES-256)
pub const CUSTOMER_KEY_LEN: usize = 32;

/// Algorithm name sent with SSE-C requests
pub const SSE_C_ALGORITHM: &str = "AES256";

pub const HEADER_SSE: &str = "x-amz-server-side-encryption";
pub const HEADER_SSE_KMS_KEY_ID: &str = "x-amz-server-side-encryption-aws-kms-key-id";
pub const HEADER_SSE_C_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
pub const HEADER_SSE_C_KEY: &str = "x-amz-server-side-encryption-customer-key";
pub const HEADER_SSE_C_KEY_MD5: &str = "x-amz-server-side-encryption-customer-key-MD5";

/// Kind of request an encryption parameter set is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Single PUT or multipart initiate: the object's encryption is chosen here
    Create,
    /// Part upload or multipart completion
    Part,
    /// HEAD or ranged GET
    Read,
}

/// Customer-provided AES-256 key with its derived request values
#[derive(Clone, PartialEq, Eq)]
pub struct CustomerKey {
    key_b64: String,
    key_md5_b64: String,
}

impl CustomerKey {
    /// Build from raw key bytes; the key must be exactly 32 bytes
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.len() != CUSTOMER_KEY_LEN {
            return Err(TransferError::InvalidConfiguration(format!(
                "customer key must be {} bytes for {}, got {}",
                CUSTOMER_KEY_LEN,
                SSE_C_ALGORITHM,
                raw.len()
            )));
        }
        let digest = md5::compute(raw);
        Ok(Self {
            key_b64: BASE64.encode(raw),
            key_md5_b64: BASE64.encode(digest.0),
        })
    }

    /// Build from a base64-encoded key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = BASE64.decode(encoded.trim()).map_err(|e| {
            TransferError::InvalidConfiguration(format!("customer key is not valid base64: {}", e))
        })?;
        Self::new(&raw)
    }

    pub fn key_base64(&self) -> &str {
        &self.key_b64
    }

    pub fn key_md5_base64(&self) -> &str {
        &self.key_md5_b64
    }
}

impl fmt::Debug for CustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerKey")
            .field("key", &"<redacted>")
            .field("key_md5", &self.key_md5_b64)
            .finish()
    }
}

/// Server-side encryption mode of a transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EncryptionContext {
    /// No encryption headers
    #[default]
    None,
    /// SSE-S3 (AES256, store-managed keys)
    SseS3,
    /// SSE-KMS with an explicit key id
    SseKms { key_id: String },
    /// SSE-C with a caller-provided key
    SseCustomer(CustomerKey),
}

impl EncryptionContext {
    pub fn sse_s3() -> Self {
        EncryptionContext::SseS3
    }

    /// SSE-KMS; the key id must not be empty
    pub fn sse_kms(key_id: impl Into<String>) -> Result<Self> {
        let key_id = key_id.into();
        if key_id.trim().is_empty() {
            return Err(TransferError::InvalidConfiguration(
                "aws:kms encryption requires a non-empty key id".to_string(),
            ));
        }
        Ok(EncryptionContext::SseKms { key_id })
    }

    /// SSE-C from raw key bytes
    pub fn customer_key(raw: &[u8]) -> Result<Self> {
        Ok(EncryptionContext::SseCustomer(CustomerKey::new(raw)?))
    }

    /// Short label used in logs
    pub fn mode(&self) -> &'static str {
        match self {
            EncryptionContext::None => "none",
            EncryptionContext::SseS3 => "AES256",
            EncryptionContext::SseKms { .. } => "aws:kms",
            EncryptionContext::SseCustomer(_) => "SSE-C",
        }
    }

    pub fn customer(&self) -> Option<&CustomerKey> {
        match self {
            EncryptionContext::SseCustomer(key) => Some(key),
            _ => None,
        }
    }

    /// Headers this context contributes to a request of the given kind.
    ///
    /// SSE-S3 and SSE-KMS are declared when the object is created; the store
    /// rejects those headers on reads and has no slot for them on parts.
    /// SSE-C parameters go on every request.
    pub fn headers(&self, kind: RequestKind) -> Vec<(&'static str, String)> {
        match self {
            EncryptionContext::None => Vec::new(),
            EncryptionContext::SseS3 if kind == RequestKind::Create => {
                vec![(HEADER_SSE, "AES256".to_string())]
            }
            EncryptionContext::SseKms { key_id } if kind == RequestKind::Create => vec![
                (HEADER_SSE, "aws:kms".to_string()),
                (HEADER_SSE_KMS_KEY_ID, key_id.clone()),
            ],
            EncryptionContext::SseS3 | EncryptionContext::SseKms { .. } => Vec::new(),
            EncryptionContext::SseCustomer(key) => vec![
                (HEADER_SSE_C_ALGORITHM, SSE_C_ALGORITHM.to_string()),
                (HEADER_SSE_C_KEY, key.key_b64.clone()),
                (HEADER_SSE_C_KEY_MD5, key.key_md5_b64.clone()),
            ],
        }
    }
}

impl fmt::Display for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())
    }
}
