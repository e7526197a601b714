//! [`ObjectStore`] backed by the AWS SDK

use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as AwsCompletedPart, ServerSideEncryption,
};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use tracing::debug;

use super::config::S3Config;
use crate::error::Result;
use crate::protocol::{
    CompletedPart, ObjectHead, ObjectStore, SourceVersion, StoreError, StoreResult,
};
use crate::transfer::encryption::{EncryptionContext, SSE_C_ALGORITHM};

/// S3 or S3-compatible bucket
#[derive(Clone)]
pub struct S3Store {
    client: AwsS3Client,
    config: S3Config,
}

/// SSE-C request fields, all set or all unset
#[derive(Default)]
struct CustomerFields {
    algorithm: Option<String>,
    key: Option<String>,
    key_md5: Option<String>,
}

impl CustomerFields {
    fn from_context(encryption: &EncryptionContext) -> Self {
        match encryption.customer() {
            Some(key) => Self {
                algorithm: Some(SSE_C_ALGORITHM.to_string()),
                key: Some(key.key_base64().to_string()),
                key_md5: Some(key.key_md5_base64().to_string()),
            },
            None => Self::default(),
        }
    }
}

/// Server-managed encryption fields for create requests
fn server_side_fields(encryption: &EncryptionContext) -> (Option<ServerSideEncryption>, Option<String>) {
    match encryption {
        EncryptionContext::SseS3 => (Some(ServerSideEncryption::Aes256), None),
        EncryptionContext::SseKms { key_id } => {
            (Some(ServerSideEncryption::AwsKms), Some(key_id.clone()))
        }
        EncryptionContext::None | EncryptionContext::SseCustomer(_) => (None, None),
    }
}

/// Object size from a HEAD response; a missing length is an error, never zero
fn object_size(key: &str, content_length: Option<i64>) -> StoreResult<u64> {
    let length = content_length
        .ok_or_else(|| StoreError::Sdk(format!("HEAD returned no Content-Length for {}", key)))?;
    u64::try_from(length).map_err(|_| {
        StoreError::InvalidRequest(format!("negative content length {} for {}", length, key))
    })
}

impl S3Store {
    /// Validate the configuration and build an SDK client
    pub async fn new(config: S3Config) -> Result<Self> {
        config.validate()?;
        let client = Self::build_aws_client(&config).await;
        Ok(Self { client, config })
    }

    async fn build_aws_client(config: &S3Config) -> AwsS3Client {
        let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = if let Some(region_str) = &config.region {
            RegionProviderChain::first_try(Region::new(region_str.clone()))
        } else {
            RegionProviderChain::default_provider()
        };
        aws_config_loader = aws_config_loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "parcel-explicit",
            );
            aws_config_loader = aws_config_loader.credentials_provider(credentials);
        }

        let aws_config = aws_config_loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        // Required for MinIO and LocalStack
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();

        // The engine owns retries; SDK-level retries would multiply attempts
        s3_config_builder = s3_config_builder
            .timeout_config(timeout_config)
            .retry_config(RetryConfig::disabled());

        AwsS3Client::from_conf(s3_config_builder.build())
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_object(
        &self,
        key: &str,
        encryption: &EncryptionContext,
    ) -> StoreResult<ObjectHead> {
        let sse_c = CustomerFields::from_context(encryption);
        let response = self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(key)
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5)
            .send()
            .await
            .map_err(StoreError::from)?;

        let size = object_size(key, response.content_length())?;

        Ok(ObjectHead {
            size,
            version_id: response.version_id().map(str::to_string),
            etag: response.e_tag().map(str::to_string),
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
        let sse_c = CustomerFields::from_context(encryption);
        let mut request = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(key)
            .range(format!("bytes={}-{}", start, end))
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5);

        request = match version {
            SourceVersion::VersionId(id) => request.version_id(id),
            SourceVersion::ETag(etag) => request.if_match(etag),
            SourceVersion::Unpinned => request,
        };

        let response = request.send().await.map_err(StoreError::from)?;
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Network(format!("Failed to collect response body: {}", e)))?;

        Ok(body.into_bytes())
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let sse_c = CustomerFields::from_context(encryption);
        let (sse, kms_key_id) = server_side_fields(encryption);
        let response = self
            .client
            .put_object()
            .bucket(self.bucket())
            .key(key)
            .body(ByteStream::from(body))
            .set_server_side_encryption(sse)
            .set_ssekms_key_id(kms_key_id)
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5)
            .send()
            .await
            .map_err(StoreError::from)?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let sse_c = CustomerFields::from_context(encryption);
        let (sse, kms_key_id) = server_side_fields(encryption);
        let response = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .set_server_side_encryption(sse)
            .set_ssekms_key_id(kms_key_id)
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5)
            .send()
            .await
            .map_err(StoreError::from)?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StoreError::Sdk("No upload ID returned".to_string()))?;
        debug!(key, upload_id, "multipart upload created");
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let sse_c = CustomerFields::from_context(encryption);
        let response = self
            .client
            .upload_part()
            .bucket(self.bucket())
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5)
            .send()
            .await
            .map_err(StoreError::from)?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Sdk(format!("No ETag returned for part {}", part_number)))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        encryption: &EncryptionContext,
    ) -> StoreResult<String> {
        let sse_c = CustomerFields::from_context(encryption);
        let completed = parts
            .iter()
            .map(|p| {
                AwsCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .set_sse_customer_algorithm(sse_c.algorithm)
            .set_sse_customer_key(sse_c.key)
            .set_sse_customer_key_md5(sse_c.key_md5)
            .send()
            .await
            .map_err(StoreError::from)?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_fields() {
        let none = CustomerFields::from_context(&EncryptionContext::None);
        assert!(none.algorithm.is_none() && none.key.is_none() && none.key_md5.is_none());

        let enc = EncryptionContext::customer_key(&[9u8; 32]).unwrap();
        let fields = CustomerFields::from_context(&enc);
        assert_eq!(fields.algorithm.as_deref(), Some("AES256"));
        assert_eq!(fields.key.as_deref(), enc.customer().map(|k| k.key_base64()));
        assert_eq!(
            fields.key_md5.as_deref(),
            enc.customer().map(|k| k.key_md5_base64())
        );
    }

    #[test]
    fn test_server_side_fields() {
        assert_eq!(server_side_fields(&EncryptionContext::None), (None, None));
        assert_eq!(
            server_side_fields(&EncryptionContext::sse_s3()),
            (Some(ServerSideEncryption::Aes256), None)
        );
        assert_eq!(
            server_side_fields(&EncryptionContext::sse_kms("alias/media").unwrap()),
            (Some(ServerSideEncryption::AwsKms), Some("alias/media".to_string()))
        );
    }

    #[test]
    fn test_object_size_requires_content_length() {
        assert_eq!(object_size("a.bin", Some(1024)).unwrap(), 1024);
        assert_eq!(object_size("empty", Some(0)).unwrap(), 0);

        let missing = object_size("a.bin", None).unwrap_err();
        assert!(matches!(missing, StoreError::Sdk(_)));
        assert!(!missing.is_retryable());

        assert!(matches!(
            object_size("a.bin", Some(-1)),
            Err(StoreError::InvalidRequest(_))
        ));
    }
}
