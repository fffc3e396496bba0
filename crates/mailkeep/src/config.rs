//! Engine configuration.
//!
//! A small JSON config file with defaults for every field, so an empty
//! object `{}` is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Runtime settings for the archival engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Where the SQLite archive lives. `None` means the canonical
    /// per-user location under the home directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Default seconds between retrieval passes for new accounts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Hard deadline for one account's network session.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Upper bound on messages fetched per mailbox per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_session_timeout() -> u64 {
    120
}

fn default_batch_size() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_secs: default_poll_interval(),
            session_timeout_secs: default_session_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl EngineConfig {
    /// Resolves the database path, falling back to the canonical location.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Loads and validates a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses and validates a configuration from a JSON string.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "poll_interval_secs must be greater than zero".to_string(),
        });
    }
    if config.session_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "session_timeout_secs must be greater than zero".to_string(),
        });
    }
    if config.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "batch_size must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gets_defaults() {
        let config = load_config_from_str("{}").unwrap();
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.session_timeout_secs, 120);
        assert_eq!(config.batch_size, 50);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_explicit_values() {
        let config = load_config_from_str(
            r#"{
                "database_path": "/tmp/archive.db",
                "poll_interval_secs": 60,
                "session_timeout_secs": 30,
                "batch_size": 10
            }"#,
        )
        .unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/archive.db")));
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.session_timeout_secs, 30);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = load_config_from_str(r#"{"poll_interval_secs": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(load_config_from_str(r#"{"session_timeout_secs": 0}"#).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(load_config_from_str(r#"{"no_such_field": 1}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"batch_size": 5}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.batch_size, 5);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_config("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
