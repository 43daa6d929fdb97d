//! Store and logging configuration.
//!
//! # Invariants
//! - Every field has a default; partial documents deserialize.
//! - `path = None` selects an in-memory database.

use crate::logging::{default_log_level, init_logging, LoggingError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Settings used to open a `StoreHandle` and start logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; in-memory when absent.
    pub path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    pub log_level: String,
    /// Absolute directory for rolling log files; logging stays off when absent.
    pub log_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl StoreConfig {
    /// Default settings for a file-backed database at `path`.
    pub fn at_path(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Starts file logging when `log_dir` is configured.
    ///
    /// Returns `Ok(false)` when no log directory is set.
    pub fn init_logging(&self) -> Result<bool, LoggingError> {
        let Some(log_dir) = self.log_dir.as_deref() else {
            return Ok(false);
        };
        init_logging(&self.log_level, log_dir)?;
        Ok(true)
    }
}
