//! Archive retention management
//!
//! Handles cleanup of old compressed archives based on age.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tracing::info;

use super::ARCHIVE_EXTENSION;

/// Delete compressed archives older than the specified number of days
///
/// Only files named `*.log.zst` are considered. Returns the number of files deleted.
pub fn prune_archives(archive_dir: &Path, retention_days: u64) -> Result<usize> {
    if !archive_dir.exists() {
        return Ok(0);
    }

    let cutoff = retention_days
        .checked_mul(24 * 60 * 60)
        .and_then(|secs| SystemTime::now().checked_sub(Duration::from_secs(secs)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let suffix = format!(".log.{}", ARCHIVE_EXTENSION);
    let mut deleted_count = 0;

    for entry in fs::read_dir(archive_dir)? {
        let entry = entry?;
        let path = entry.path();

        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.ends_with(&suffix) => {}
            _ => continue,
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if modified < cutoff && fs::remove_file(&path).is_ok() {
                    deleted_count += 1;
                }
            }
        }
    }

    if deleted_count > 0 {
        info!(
            dir = %archive_dir.display(),
            "Pruned {} archives older than {} days",
            deleted_count,
            retention_days
        );
    }

    Ok(deleted_count)
}
