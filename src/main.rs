/*!
 * Parcel CLI - parallel uploads and downloads for S3-compatible stores
 */

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use parcel::{
    cli_progress::CliProgressRenderer,
    config::{LogLevel, TransferConfig},
    error::{Result, TransferError},
    logging,
    protocol::s3::{S3Config, S3Store},
    transfer::{
        EncryptionContext, ProgressReporter, StrategyOverride, TransferJob, TransferRequest,
        TransferResult,
    },
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "parcel")]
#[command(version, about = "Parallel chunked transfers for S3-compatible object stores", long_about = None)]
struct Cli {
    /// Load settings from a TOML file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Verbose output (debug logging, per-part progress)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write JSON logs to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack, ...)
    #[arg(long, value_name = "URL", global = true)]
    endpoint: Option<String>,

    /// Use path-style addressing
    #[arg(long, global = true)]
    path_style: bool,

    /// Print the result summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file to a bucket
    Upload {
        /// Local file to read
        local: PathBuf,
        bucket: String,
        key: String,

        /// Store with a single PUT
        #[arg(long, conflicts_with = "force_multipart")]
        force_single: bool,

        /// Use a multipart upload regardless of size
        #[arg(long)]
        force_multipart: bool,

        /// Server-side encryption
        #[arg(long, value_enum, default_value = "none")]
        encryption: EncryptionArg,

        /// KMS key id for --encryption aws-kms
        #[arg(long, value_name = "ID")]
        kms_key_id: Option<String>,

        /// 32-byte key for --encryption customer-key
        #[arg(long, value_name = "KEY")]
        customer_key: Option<String>,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Download an object to a local file
    Download {
        bucket: String,
        key: String,
        /// Local file to write
        local: PathBuf,

        /// Fetch with a single GET
        #[arg(long, conflicts_with = "force_chunked")]
        force_single: bool,

        /// Fetch in ranges regardless of size
        #[arg(long)]
        force_chunked: bool,

        /// 32-byte key the object was stored with
        #[arg(long, value_name = "KEY")]
        customer_key: Option<String>,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

#[derive(Args)]
struct TuningArgs {
    /// Chunk size in MiB
    #[arg(long, value_name = "MIB")]
    chunk_size: Option<u64>,

    /// Concurrent part workers
    #[arg(long)]
    workers: Option<usize>,

    /// Retries per request
    #[arg(long)]
    retries: Option<u32>,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum EncryptionArg {
    None,
    Aes256,
    AwsKms,
    CustomerKey,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TransferConfig::from_file(path)?,
        None => TransferConfig::default(),
    };
    apply_global_overrides(&mut config, &cli);
    let cli_json = cli.json;

    let (bucket, request, show_progress) = match cli.command {
        Commands::Upload {
            local,
            bucket,
            key,
            force_single,
            force_multipart,
            encryption,
            kms_key_id,
            customer_key,
            tuning,
        } => {
            apply_tuning(&mut config, &tuning);
            let strategy = if force_single {
                StrategyOverride::ForceSingle
            } else if force_multipart {
                StrategyOverride::ForceMultipart
            } else {
                StrategyOverride::Auto
            };
            let encryption = upload_encryption(encryption, kms_key_id, customer_key)?;
            let request = TransferRequest::upload(local, key)
                .with_strategy(strategy)
                .with_encryption(encryption);
            (bucket, request, tuning.progress)
        }
        Commands::Download {
            bucket,
            key,
            local,
            force_single,
            force_chunked,
            customer_key,
            tuning,
        } => {
            apply_tuning(&mut config, &tuning);
            let strategy = if force_single {
                StrategyOverride::ForceSingle
            } else if force_chunked {
                StrategyOverride::ForceChunked
            } else {
                StrategyOverride::Auto
            };
            let encryption = match customer_key {
                Some(key) => EncryptionContext::customer_key(key.as_bytes())?,
                None => EncryptionContext::None,
            };
            let request = TransferRequest::download(key, local)
                .with_strategy(strategy)
                .with_encryption(encryption);
            (bucket, request, tuning.progress)
        }
    };

    config.validate()?;
    logging::init_logging(&config)?;

    let request = request
        .with_chunk_size(config.chunk_size_bytes())
        .with_workers(config.workers)
        .with_retry_policy(config.retry_policy())
        .with_single_shot_limit(config.single_shot_limit_bytes());
    let s3_config = S3Config::from_settings(bucket, &config.s3, config.request_timeout_secs);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(execute(s3_config, request, show_progress, config.verbose))?;

    if cli_json {
        print_json_summary(&result);
    } else {
        print_summary(&result);
    }
    Ok(result.exit_code())
}

fn apply_global_overrides(config: &mut TransferConfig, cli: &Cli) {
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.verbose {
        config.verbose = true;
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.clone());
    }
    if let Some(region) = &cli.region {
        config.s3.region = Some(region.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.s3.endpoint = Some(endpoint.clone());
    }
    if cli.path_style {
        config.s3.force_path_style = true;
    }
}

fn apply_tuning(config: &mut TransferConfig, tuning: &TuningArgs) {
    if let Some(chunk_size) = tuning.chunk_size {
        config.chunk_size_mib = chunk_size;
    }
    if let Some(workers) = tuning.workers {
        config.workers = workers;
    }
    if let Some(retries) = tuning.retries {
        config.max_retries = retries;
    }
}

fn upload_encryption(
    mode: EncryptionArg,
    kms_key_id: Option<String>,
    customer_key: Option<String>,
) -> Result<EncryptionContext> {
    match mode {
        EncryptionArg::None => Ok(EncryptionContext::None),
        EncryptionArg::Aes256 => Ok(EncryptionContext::sse_s3()),
        EncryptionArg::AwsKms => {
            let key_id = kms_key_id.ok_or_else(|| {
                TransferError::InvalidConfiguration(
                    "--encryption aws-kms requires --kms-key-id".to_string(),
                )
            })?;
            EncryptionContext::sse_kms(key_id)
        }
        EncryptionArg::CustomerKey => {
            let key = customer_key.ok_or_else(|| {
                TransferError::InvalidConfiguration(
                    "--encryption customer-key requires --customer-key".to_string(),
                )
            })?;
            EncryptionContext::customer_key(key.as_bytes())
        }
    }
}

async fn execute(
    s3_config: S3Config,
    request: TransferRequest,
    show_progress: bool,
    verbose: bool,
) -> Result<TransferResult> {
    let store = Arc::new(S3Store::new(s3_config).await?);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling transfer...");
            interrupt.cancel();
        }
    });

    let mut job = TransferJob::new(request, store).with_cancellation(cancel);
    let renderer = if show_progress {
        let (reporter, receiver) = ProgressReporter::new();
        job = job.with_progress(reporter);
        Some(CliProgressRenderer::new(receiver, verbose).spawn())
    } else {
        None
    };

    let result = job.run().await;

    // The job dropped its reporter, so the renderer drains and exits
    if let Some(handle) = renderer {
        if let Err(e) = handle.await {
            tracing::debug!("progress renderer stopped: {}", e);
        }
    }

    Ok(result)
}

fn print_summary(result: &TransferResult) {
    let strategy = result
        .strategy
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("{} {}: {}", result.direction, result.key, result.status);
    println!(
        "  {} of {} bytes, {} part(s), {}, {:.2} MiB/s in {:.2}s",
        result.bytes_transferred,
        result.object_size,
        result.parts,
        strategy,
        result.throughput_mibps(),
        result.duration.as_secs_f64()
    );
    if let Some(etag) = &result.etag {
        println!("  etag: {}", etag);
    }
    if let Some(error) = &result.error {
        eprintln!("  error: {}", error);
    }
    if let Some(cleanup) = &result.cleanup_error {
        eprintln!(
            "  cleanup failed: {} (the upload may need to be aborted manually)",
            cleanup
        );
    }
}

fn print_json_summary(result: &TransferResult) {
    let summary = serde_json::json!({
        "operation_id": result.operation_id,
        "status": result.status.to_string(),
        "direction": result.direction,
        "key": result.key,
        "object_size": result.object_size,
        "bytes_transferred": result.bytes_transferred,
        "strategy": result.strategy.as_ref().map(|s| s.to_string()),
        "parts": result.parts,
        "etag": result.etag,
        "duration_ms": result.duration.as_millis() as u64,
        "throughput_mibps": result.throughput_mibps(),
        "error": result.error.as_ref().map(|e| e.to_string()),
        "cleanup_error": result.cleanup_error.as_ref().map(|e| e.to_string()),
    });
    println!("{}", summary);
}
