//! CLI entry point for the Hong Kong bus data collector.
//!
//! `collect` runs a full fetch-validate-publish cycle, `validate` checks a
//! snapshot already on disk, and `upload` re-publishes the local snapshot to
//! object storage.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use hk_bus_collector::config::{CollectorConfig, StorageConfig};
use hk_bus_collector::error::PipelineError;
use hk_bus_collector::pipeline::{Collector, validate_snapshot_file};
use hk_bus_collector::publish::{ObjectStore, Publisher, S3ObjectStore};
use hk_bus_collector::validate::{CheckStatus, ValidationReport};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "hk_bus_collector")]
#[command(about = "Collects Hong Kong bus routes and stops into a versioned snapshot", long_about = None)]
struct Cli {
    /// JSON config file; environment variables and flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both agencies, validate, and publish a new snapshot
    Collect {
        /// Directory the snapshot, metadata and backups are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Optional: S3 bucket to upload the snapshot to
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Gzip the snapshot before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Concurrent route-direction tasks for the per-route agency
        #[arg(long)]
        route_concurrency: Option<usize>,

        /// Concurrent stop detail fetches across all route tasks
        #[arg(long)]
        stop_concurrency: Option<usize>,

        /// Number of previous snapshots to keep
        #[arg(long)]
        backup_retention: Option<usize>,
    },
    /// Run the validation checks against an existing snapshot file
    Validate {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
    /// Upload the local snapshot and its metadata to S3
    Upload {
        /// Overrides the configured bucket
        #[arg(long)]
        s3_bucket: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/hk_bus_collector.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("hk_bus_collector.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = CollectorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            output_dir,
            s3_bucket,
            gzip,
            route_concurrency,
            stop_concurrency,
            backup_retention,
        } => {
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(n) = route_concurrency {
                config.route_concurrency = n;
            }
            if let Some(n) = stop_concurrency {
                config.stop_concurrency = n;
            }
            if let Some(n) = backup_retention {
                config.backup_retention = n;
            }
            override_bucket(&mut config, s3_bucket);
            if gzip {
                if let Some(storage) = config.storage.as_mut() {
                    storage.gzip = true;
                } else {
                    warn!("--gzip has no effect without an S3 bucket");
                }
            }

            let publisher = publisher(&config).await;
            let collector = Collector::new(config, publisher)?;
            match collector.run().await {
                Ok(outcome) => {
                    log_report(&outcome.report);
                    info!(
                        version = outcome.version,
                        snapshot = %outcome.publish.snapshot_path.display(),
                        uploaded = outcome.publish.uploaded,
                        "Snapshot published"
                    );
                }
                Err(PipelineError::ValidationFailed(report)) => {
                    log_report(&report);
                    bail!("validation failed, previous snapshot left in place");
                }
                Err(e) => {
                    error!(error = %e, "Collection run aborted");
                    return Err(e.into());
                }
            }
        }
        Commands::Validate { snapshot } => {
            let report = validate_snapshot_file(&snapshot, &config.validation)?;
            log_report(&report);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.passed() {
                bail!("{} failed validation", snapshot.display());
            }
        }
        Commands::Upload { s3_bucket } => {
            override_bucket(&mut config, s3_bucket);
            if config.storage.is_none() {
                bail!("no S3 bucket configured (set S3_BUCKET or pass --s3-bucket)");
            }
            let metadata = publisher(&config).await.upload_existing().await?;
            info!(
                version = metadata.version,
                md5 = %metadata.md5_checksum,
                url = %metadata.download_url,
                "Manual upload complete"
            );
        }
    }

    Ok(())
}

fn override_bucket(config: &mut CollectorConfig, bucket: Option<String>) {
    let Some(bucket) = bucket.filter(|b| !b.is_empty()) else {
        return;
    };
    match config.storage.as_mut() {
        Some(storage) => storage.bucket = bucket,
        None => {
            config.storage = Some(StorageConfig {
                bucket,
                key_prefix: String::new(),
                gzip: false,
            })
        }
    }
}

/// Builds the publisher, attaching S3 when a bucket is configured.
async fn publisher(config: &CollectorConfig) -> Publisher {
    let publisher = Publisher::new(config);
    match &config.storage {
        Some(storage) => {
            info!(bucket = %storage.bucket, gzip = storage.gzip, "S3 upload enabled");
            let store: Arc<dyn ObjectStore> =
                Arc::new(S3ObjectStore::from_env(storage.bucket.clone()).await);
            publisher.with_object_store(storage.clone(), store)
        }
        None => publisher,
    }
}

fn log_report(report: &ValidationReport) {
    for check in &report.checks {
        match check.status {
            CheckStatus::Pass => {}
            CheckStatus::Warn => warn!(
                check = %check.name,
                offending = check.offending,
                examples = ?check.examples,
                "{}",
                check.message
            ),
            CheckStatus::Fail => error!(
                check = %check.name,
                offending = check.offending,
                examples = ?check.examples,
                "{}",
                check.message
            ),
        }
    }
    info!(status = %report.status, checks = report.checks.len(), "Validation report");
}
