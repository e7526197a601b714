/*!
 * Configuration for parcel
 *
 * Settings come from an optional TOML file and are then overridden by
 * command-line flags.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};
use crate::transfer::retry::{BackoffStrategy, RetryPolicy};
use crate::transfer::{DEFAULT_WORKERS, MAX_PART_SIZE, MIB};

/// Engine and CLI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in MiB
    pub chunk_size_mib: u64,

    /// Concurrent part workers
    pub workers: usize,

    /// Retries after the first attempt of each request
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub retry_initial_delay_ms: u64,

    /// Cap on the delay between retries, in seconds
    pub retry_max_delay_secs: u64,

    /// Upper bound on a single request, in seconds
    pub request_timeout_secs: u64,

    /// Cap on bytes a forced single-shot transfer may buffer, in MiB
    pub max_single_shot_mib: u64,

    /// Log level
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stderr
    pub log_file: Option<PathBuf>,

    /// Verbose output (forces debug logging)
    pub verbose: bool,

    /// Store connection settings
    pub s3: StoreSettings,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_mib: 5,
            workers: DEFAULT_WORKERS,
            max_retries: 3,
            retry_initial_delay_ms: 200,
            retry_max_delay_secs: 30,
            request_timeout_secs: 300,
            max_single_shot_mib: 512,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            s3: StoreSettings::default(),
        }
    }
}

/// Connection settings for an S3-compatible endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack, ...)
    pub endpoint: Option<String>,

    /// Path-style addressing
    pub force_path_style: bool,

    /// Access key id; the default credential chain is used when unset
    pub access_key: Option<String>,

    /// Secret access key
    pub secret_key: Option<String>,

    /// Session token for temporary credentials
    pub session_token: Option<String>,
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            TransferError::InvalidConfiguration(format!(
                "failed to parse {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            TransferError::InvalidConfiguration(format!("failed to serialize config: {}", e))
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mib.saturating_mul(MIB)
    }

    pub fn single_shot_limit_bytes(&self) -> u64 {
        self.max_single_shot_mib.saturating_mul(MIB)
    }

    /// Reject settings no transfer could run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_mib == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk_size_mib must be at least 1".to_string(),
            ));
        }
        if self.chunk_size_bytes() > MAX_PART_SIZE {
            return Err(TransferError::InvalidConfiguration(format!(
                "chunk_size_mib {} exceeds the 5 GiB part limit",
                self.chunk_size_mib
            )));
        }
        if self.workers == 0 {
            return Err(TransferError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(TransferError::InvalidConfiguration(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            backoff: BackoffStrategy::ExponentialWithJitter,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..Default::default()
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// Everything
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}
