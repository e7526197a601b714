//! Connection settings for the S3 store

use serde::{Deserialize, Serialize};

use crate::config::StoreSettings;
use crate::error::{Result, TransferError};

/// S3 store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// AWS access key ID (uses the credential chain if not provided)
    pub access_key: Option<String>,

    /// AWS secret access key
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    pub session_token: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// SDK operation timeout in seconds
    pub timeout_seconds: u64,
}

impl S3Config {
    /// Configuration for `bucket` with everything else defaulted
    pub fn new(bucket: String) -> Self {
        Self {
            bucket,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: 300,
        }
    }

    /// Build from the `[s3]` table of a config file
    pub fn from_settings(bucket: String, settings: &StoreSettings, timeout_seconds: u64) -> Self {
        Self {
            bucket,
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
            session_token: settings.session_token.clone(),
            force_path_style: settings.force_path_style,
            timeout_seconds,
        }
    }

    pub fn builder(bucket: String) -> S3ConfigBuilder {
        S3ConfigBuilder::new(bucket)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_valid_bucket_name(&self.bucket) {
            return Err(TransferError::InvalidConfiguration(format!(
                "Invalid bucket name: '{}'. Bucket names must be 3-63 characters, \
                 lowercase letters, numbers, hyphens, and periods only",
                self.bucket
            )));
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(TransferError::InvalidConfiguration(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(TransferError::InvalidConfiguration(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for S3Config
#[derive(Debug, Clone)]
pub struct S3ConfigBuilder {
    config: S3Config,
}

impl S3ConfigBuilder {
    pub fn new(bucket: String) -> Self {
        Self {
            config: S3Config::new(bucket),
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.config.access_key = Some(access_key.into());
        self.config.secret_key = Some(secret_key.into());
        self
    }

    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.config.session_token = Some(token.into());
        self
    }

    pub fn force_path_style(mut self, enabled: bool) -> Self {
        self.config.force_path_style = enabled;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<S3Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Check S3 bucket naming rules
fn is_valid_bucket_name(name: &str) -> bool {
    if !(3..=63).contains(&name.len()) {
        return false;
    }

    let edge_ok = |c: Option<char>| matches!(c, Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return false;
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    // Cannot be formatted as an IP address
    if name.split('.').count() == 4 && name.split('.').all(|s| s.parse::<u8>().is_ok()) {
        return false;
    }

    !name.starts_with("xn--") && !name.ends_with("-s3alias")
}
