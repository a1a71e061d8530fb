//! Archival of rotated log files
//!
//! When a stream leaves an hour bucket, its live file is renamed into the
//! archive directory under a name carrying the stream and the bucket, then
//! compressed in the background. The uncompressed copy is removed once the
//! compressed one is complete.

pub mod retention;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::debug;

use crate::stream::ErrorSink;
use crate::tasks::TaskPool;

/// Extension appended to compressed archives
pub const ARCHIVE_EXTENSION: &str = "zst";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to archive {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to create target {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("compression of {path} failed: {source}")]
    Compress { path: PathBuf, source: io::Error },

    #[error("failed to remove source {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Hour label of a bucket, e.g. `2024-03-01T14:00:00Z`
pub fn bucket_label(bucket: DateTime<Utc>) -> String {
    bucket.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Path a live file is renamed to when its bucket is closed
pub fn archive_path(archive_dir: &Path, name: &str, bucket: DateTime<Utc>) -> PathBuf {
    archive_dir.join(format!("{}.{}.log", name, bucket_label(bucket)))
}

/// Sibling path holding the compressed form of `path`
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".");
    file_name.push(ARCHIVE_EXTENSION);
    path.with_file_name(file_name)
}

/// Compress `path` next to itself and delete it on success
///
/// Returns the path of the compressed file.
pub fn compress(path: &Path, level: i32) -> Result<PathBuf, ArchiveError> {
    let mut input = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let out_path = compressed_path(path);
    let output = File::create(&out_path).map_err(|source| ArchiveError::Create {
        path: out_path.clone(),
        source,
    })?;

    let written = zstd::stream::write::Encoder::new(output, level).and_then(|mut encoder| {
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()
    });
    if let Err(source) = written {
        // drop the partial output, the source stays in place
        let _ = fs::remove_file(&out_path);
        return Err(ArchiveError::Compress {
            path: path.to_path_buf(),
            source,
        });
    }

    fs::remove_file(path).map_err(|source| ArchiveError::Remove {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(out_path)
}

fn create_archive_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Renames closed files into the archive directory and compresses them
#[derive(Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
    level: i32,
    tasks: Arc<TaskPool>,
    errors: ErrorSink,
}

impl Archiver {
    pub fn new(archive_dir: PathBuf, level: i32, tasks: Arc<TaskPool>, errors: ErrorSink) -> Self {
        Self {
            archive_dir,
            level,
            tasks,
            errors,
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Move a closed live file to its archive path and queue compression
    ///
    /// The rename happens before returning; compression does not.
    pub fn rotate(
        &self,
        live: &Path,
        name: &str,
        bucket: DateTime<Utc>,
    ) -> Result<PathBuf, ArchiveError> {
        let target = self.unused_archive_path(name, bucket);

        let renamed =
            create_archive_dir(&self.archive_dir).and_then(|()| fs::rename(live, &target));
        renamed.map_err(|source| ArchiveError::Rename {
            from: live.to_path_buf(),
            to: target.clone(),
            source,
        })?;

        self.submit(target.clone());
        Ok(target)
    }

    /// Archive path for a bucket that does not clash with an earlier archive
    ///
    /// A bucket can be closed twice when entries arrive out of hour order;
    /// later archives get a `.1`, `.2`, ... suffix.
    fn unused_archive_path(&self, name: &str, bucket: DateTime<Utc>) -> PathBuf {
        let mut candidate = archive_path(&self.archive_dir, name, bucket);
        let mut n = 1;
        while candidate.exists() || compressed_path(&candidate).exists() {
            candidate = self
                .archive_dir
                .join(format!("{}.{}.{}.log", name, bucket_label(bucket), n));
            n += 1;
        }
        candidate
    }

    /// Queue compression of an already archived file
    pub fn submit(&self, path: PathBuf) {
        let level = self.level;
        let errors = self.errors.clone();
        self.tasks.spawn("compress", move || match compress(&path, level) {
            Ok(out) => debug!(archive = %out.display(), "Archive compressed"),
            Err(e) => errors.report(format_args!("compress {}: {}\n", path.display(), e)),
        });
    }
}
