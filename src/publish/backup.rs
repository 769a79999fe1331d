//! Count-based rotation of previously published snapshots.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Backups are named `<stem>.<seq>.<timestamp>.json`; `seq` increases by one
/// per backup and defines the age order.
pub struct BackupRotation {
    dir: PathBuf,
    stem: String,
    retention: usize,
}

impl BackupRotation {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            retention,
        }
    }

    /// Copies `current` into the backup directory if it exists.
    ///
    /// An error here must stop the caller from overwriting `current`.
    pub fn backup(&self, current: &Path, at: DateTime<Utc>) -> Result<Option<PathBuf>> {
        if !current.exists() {
            debug!(path = %current.display(), "No previous snapshot to back up");
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup dir {}", self.dir.display()))?;

        let next_seq = self.list()?.last().map(|(seq, _)| seq + 1).unwrap_or(1);
        let name = format!(
            "{}.{:06}.{}.json",
            self.stem,
            next_seq,
            at.format("%Y%m%dT%H%M%SZ")
        );
        let target = self.dir.join(name);

        fs::copy(current, &target).with_context(|| {
            format!(
                "failed to back up {} to {}",
                current.display(),
                target.display()
            )
        })?;
        info!(backup = %target.display(), "Previous snapshot backed up");
        Ok(Some(target))
    }

    /// Deletes the oldest backups until at most `retention` remain.
    /// Returns the deleted paths.
    pub fn rotate(&self) -> Result<Vec<PathBuf>> {
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(self.retention);
        let mut deleted = Vec::with_capacity(excess);

        for (_, path) in backups.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Old backup removed");
                    deleted.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old backup"),
            }
        }
        Ok(deleted)
    }

    /// Existing backups, oldest first.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}.", self.stem);
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name
                .strip_prefix(&prefix)
                .and_then(|r| r.strip_suffix(".json"))
            else {
                continue;
            };
            let Some(seq) = rest.split('.').next().and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };
            backups.push((seq, entry.path()));
        }

        backups.sort_by_key(|(seq, _)| *seq);
        Ok(backups)
    }
}
