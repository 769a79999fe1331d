//! Versioned snapshot publishing: backup, write, checksum, upload.

pub mod backup;
pub mod checksum;
pub mod snapshot;
pub mod upload;

pub use backup::BackupRotation;
pub use checksum::Checksums;
pub use snapshot::{RunVersion, Snapshot, SnapshotMetadata, Summary};
pub use upload::{MemoryObjectStore, ObjectStore, ObjectUpload, S3ObjectStore};

use crate::config::{CollectorConfig, StorageConfig};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Where a publish left its files.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub snapshot_path: PathBuf,
    pub metadata_path: PathBuf,
    pub backup: Option<PathBuf>,
    pub metadata: SnapshotMetadata,
    pub uploaded: bool,
}

pub struct Publisher {
    snapshot_path: PathBuf,
    metadata_path: PathBuf,
    rotation: BackupRotation,
    storage: Option<(StorageConfig, Arc<dyn ObjectStore>)>,
}

impl Publisher {
    pub fn new(config: &CollectorConfig) -> Self {
        let stem = Path::new(&config.snapshot_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("snapshot")
            .to_string();
        Self {
            snapshot_path: config.snapshot_path(),
            metadata_path: config.metadata_path(),
            rotation: BackupRotation::new(config.backup_path(), stem, config.backup_retention),
            storage: None,
        }
    }

    /// Uploads every publish to `store` using the key layout in `storage`.
    pub fn with_object_store(mut self, storage: StorageConfig, store: Arc<dyn ObjectStore>) -> Self {
        self.storage = Some((storage, store));
        self
    }

    fn snapshot_name(&self) -> String {
        file_name(&self.snapshot_path)
    }

    fn download_url(&self) -> String {
        match &self.storage {
            Some((storage, store)) => store.locator(&storage.key_for(&self.snapshot_name())),
            None => self.snapshot_path.display().to_string(),
        }
    }

    /// Writes `snapshot` and its metadata, replacing the previous publish.
    ///
    /// The previous snapshot is copied to the backup directory first; if that
    /// copy fails nothing is overwritten.
    #[tracing::instrument(skip_all, fields(version = snapshot.version))]
    pub async fn publish(&self, snapshot: &Snapshot) -> Result<PublishOutcome> {
        let bytes = snapshot.to_bytes().context("failed to serialize snapshot")?;

        if let Some(dir) = self.snapshot_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        }

        let backup = self
            .rotation
            .backup(&self.snapshot_path, snapshot.generated_at)
            .context("backup of previous snapshot failed, not overwriting it")?;
        match self.rotation.rotate() {
            Ok(deleted) if !deleted.is_empty() => info!(deleted = deleted.len(), "Old backups rotated out"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Backup rotation failed"),
        }

        write_atomically(&self.snapshot_path, &bytes)?;

        let metadata = SnapshotMetadata::new(snapshot, &bytes, self.download_url());
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
        write_atomically(&self.metadata_path, &metadata_bytes)?;

        info!(
            path = %self.snapshot_path.display(),
            bytes = metadata.file_size_bytes,
            md5 = %metadata.md5_checksum,
            "Snapshot written"
        );

        let uploaded = self.upload(bytes, metadata_bytes, &metadata).await?;

        Ok(PublishOutcome {
            snapshot_path: self.snapshot_path.clone(),
            metadata_path: self.metadata_path.clone(),
            backup,
            metadata,
            uploaded,
        })
    }

    /// Publishes the snapshot already on disk, regenerating its metadata
    /// when the stored MD5 no longer matches the file.
    #[tracing::instrument(skip_all)]
    pub async fn upload_existing(&self) -> Result<SnapshotMetadata> {
        let bytes = fs::read(&self.snapshot_path)
            .with_context(|| format!("failed to read {}", self.snapshot_path.display()))?;
        let checksums = Checksums::of(&bytes);

        let existing: Option<SnapshotMetadata> = fs::read(&self.metadata_path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok());

        let metadata = match existing {
            Some(meta) if meta.md5_checksum == checksums.md5 => {
                info!("Metadata matches snapshot");
                meta
            }
            _ => {
                warn!("Metadata missing or outdated, regenerating");
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to parse {}", self.snapshot_path.display()))?;
                let meta = SnapshotMetadata::new(&snapshot, &bytes, self.download_url());
                write_atomically(&self.metadata_path, &serde_json::to_vec_pretty(&meta)?)?;
                meta
            }
        };

        let metadata_bytes = fs::read(&self.metadata_path)?;
        if !self.upload(bytes, metadata_bytes, &metadata).await? {
            anyhow::bail!("no object store configured");
        }
        Ok(metadata)
    }

    async fn upload(
        &self,
        snapshot_bytes: Vec<u8>,
        metadata_bytes: Vec<u8>,
        metadata: &SnapshotMetadata,
    ) -> Result<bool> {
        let Some((storage, store)) = &self.storage else {
            info!("No object store configured, skipping upload");
            return Ok(false);
        };

        let object_metadata = metadata.object_metadata();
        let mut snapshot_upload =
            ObjectUpload::json(storage.key_for(&self.snapshot_name()), snapshot_bytes)
                .with_metadata(object_metadata.clone());
        if storage.gzip {
            snapshot_upload = snapshot_upload.gzipped()?;
        }
        let metadata_upload =
            ObjectUpload::json(storage.key_for(&file_name(&self.metadata_path)), metadata_bytes)
                .with_metadata(object_metadata);

        store
            .put(snapshot_upload)
            .await
            .context("snapshot written locally but upload failed")?;
        store
            .put(metadata_upload)
            .await
            .context("snapshot uploaded but metadata upload failed")?;

        info!(url = %metadata.download_url, "Snapshot uploaded");
        Ok(true)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Writes to a sibling temp file and renames it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}
