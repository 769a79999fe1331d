//! Collector configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! JSON file, environment variables, and finally command-line flags applied
//! by the binary.

use crate::sources::RouteIdPolicy;
use crate::validate::ValidationConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub kmb_base_url: String,
    pub ctb_base_url: String,
    /// Company code used in per-route agency URLs.
    pub ctb_company: String,

    pub output_dir: PathBuf,
    pub snapshot_file: String,
    pub metadata_file: String,
    /// Backup directory, relative to `output_dir` unless absolute.
    pub backup_dir: PathBuf,
    pub backup_retention: usize,

    pub request_timeout_secs: u64,
    pub route_concurrency: usize,
    pub stop_concurrency: usize,
    pub phase_timeout_secs: Option<u64>,

    pub route_id_policy: RouteIdPolicy,
    pub validation: ValidationConfig,
    pub storage: Option<StorageConfig>,
}

/// Remote object store destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default)]
    pub gzip: bool,
}

impl StorageConfig {
    pub fn key_for(&self, name: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            kmb_base_url: "https://data.etabus.gov.hk/v1/transport/kmb".to_string(),
            ctb_base_url: "https://rt.data.gov.hk/v2/transport/citybus".to_string(),
            ctb_company: "CTB".to_string(),
            output_dir: PathBuf::from("output"),
            snapshot_file: "bus_data.json".to_string(),
            metadata_file: "bus_data_metadata.json".to_string(),
            backup_dir: PathBuf::from("backups"),
            backup_retention: 5,
            request_timeout_secs: 30,
            route_concurrency: 10,
            stop_concurrency: 5,
            phase_timeout_secs: None,
            route_id_policy: RouteIdPolicy::default(),
            validation: ValidationConfig::default(),
            storage: None,
        }
    }
}

impl CollectorConfig {
    /// Loads defaults, overlays `path` when given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Applies overrides from a variable lookup (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("KMB_BASE_URL") {
            self.kmb_base_url = url;
        }
        if let Some(url) = lookup("CTB_BASE_URL") {
            self.ctb_base_url = url;
        }
        if let Some(dir) = lookup("OUTPUT_DIRECTORY") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = lookup("BACKUP_RETENTION") {
            self.backup_retention = n
                .parse()
                .with_context(|| format!("BACKUP_RETENTION must be an integer, got {n:?}"))?;
        }
        if let Some(bucket) = lookup("S3_BUCKET").filter(|b| !b.is_empty()) {
            let prefix = lookup("S3_KEY_PREFIX").unwrap_or_default();
            match &mut self.storage {
                Some(storage) => {
                    storage.bucket = bucket;
                    if !prefix.is_empty() {
                        storage.key_prefix = prefix;
                    }
                }
                None => {
                    self.storage = Some(StorageConfig {
                        bucket,
                        key_prefix: prefix,
                        gzip: false,
                    })
                }
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(&self.snapshot_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(&self.metadata_file)
    }

    pub fn backup_path(&self) -> PathBuf {
        if self.backup_dir.is_absolute() {
            self.backup_dir.clone()
        } else {
            self.output_dir.join(&self.backup_dir)
        }
    }
}
