//! Page database configuration
//!
//! Loaded from a JSON file. Every field except `data_dir` has a default;
//! `data_dir` is required only for the durable `log` backend.
//!
//! ```json
//! {
//!   "backend": "log",
//!   "data_dir": "/var/lib/pages/page-1",
//!   "sync_mode": "fsync",
//!   "log_level": "info"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{log_event_with_fields, Event, Logger, Severity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which key-value store backs the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile ordered map
    #[default]
    Memory,
    /// Append-only batch log under `data_dir`
    Log,
}

/// Whether each batch is fsynced before it becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Fsync,
    /// Skip the per-batch fsync (scratch and test pages)
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDbConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory of the page (required for the log backend)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Minimum severity written by the logger
    #[serde(default = "default_log_level")]
    pub log_level: Severity,
}

fn default_log_level() -> Severity {
    Severity::Info
}

impl Default for PageDbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            data_dir: None,
            sync_mode: SyncMode::default(),
            log_level: default_log_level(),
        }
    }
}

impl PageDbConfig {
    /// In-memory page, nothing persisted.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Durable page rooted at `data_dir`.
    pub fn log(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Log,
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        log_event_with_fields(
            Event::ConfigLoaded,
            &[("path", &path.display().to_string())],
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: PageDbConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StoreBackend::Log && self.data_dir.is_none() {
            return Err(ConfigError::Invalid(
                "data_dir is required for the log backend".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether every batch is fsynced before it becomes visible.
    pub fn sync_on_write(&self) -> bool {
        self.sync_mode == SyncMode::Fsync
    }

    /// Installs `log_level` as the process-wide logging threshold.
    pub fn apply_log_level(&self) {
        Logger::set_min_severity(self.log_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PageDbConfig::from_json("{}").unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.sync_mode, SyncMode::Fsync);
        assert_eq!(config.log_level, Severity::Info);
        assert!(config.sync_on_write());
    }

    #[test]
    fn test_log_backend_requires_data_dir() {
        let err = PageDbConfig::from_json(r#"{"backend": "log"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            PageDbConfig::from_json(r#"{"backend": "log", "data_dir": "/tmp/page"}"#).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/page")));
    }

    #[test]
    fn test_rejects_unknown_sync_mode() {
        let err = PageDbConfig::from_json(r#"{"sync_mode": "async"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_parse_error() {
        let err = PageDbConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("page.json");
        fs::write(&path, r#"{"sync_mode": "none", "log_level": "warn"}"#).unwrap();

        let config = PageDbConfig::load(&path).unwrap();
        assert_eq!(config.sync_mode, SyncMode::None);
        assert!(!config.sync_on_write());
        assert_eq!(config.log_level, Severity::Warn);

        let missing = PageDbConfig::load(&temp_dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_apply_log_level() {
        let previous = Logger::min_severity();
        let config = PageDbConfig::from_json(r#"{"log_level": "error"}"#).unwrap();

        config.apply_log_level();
        assert_eq!(Logger::min_severity(), Severity::Error);

        Logger::set_min_severity(previous);
    }
}
