//! Configuration management for taintlog

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/taintlog.toml";

/// Suffix of live log files
const LOG_EXTENSION: &str = "log";

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the live `<name>.log` files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Name of the archive subdirectory inside `log_dir`
    #[serde(default = "default_archive_dir_name")]
    pub archive_dir_name: String,

    /// zstd level used when compressing rotated files (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Whether file output is enabled for streams created at startup
    #[serde(default)]
    pub file_output: bool,

    /// Upper bound on entries buffered while file output is disabled
    ///
    /// Unset means unbounded. When set, the oldest entries are dropped first.
    #[serde(default)]
    pub max_pending_entries: Option<usize>,

    /// Compressed archives older than this are pruned (default: 30)
    #[serde(default = "default_archive_retention_days")]
    pub archive_retention_days: u64,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_archive_dir_name() -> String {
    "archives".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_archive_retention_days() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            archive_dir_name: default_archive_dir_name(),
            compression_level: default_compression_level(),
            file_output: false,
            max_pending_entries: None,
            archive_retention_days: default_archive_retention_days(),
        }
    }
}

impl Config {
    /// Configuration rooted at another log directory, everything else default
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file, or return default if not found
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Path of the live file for a stream
    pub fn live_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.{}", name, LOG_EXTENSION))
    }

    /// Directory receiving rotated files
    pub fn archive_dir(&self) -> PathBuf {
        self.log_dir.join(&self.archive_dir_name)
    }

    /// Ensure the log and archive directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(self.archive_dir())
            .context("Failed to create archive directory")?;
        Ok(())
    }
}
