//! Client configuration.
//!
//! Settings come from a JSON document located by `DAS_CLIENT_CONFIG` or
//! `<config_dir>/das/client.json`; a missing file yields the defaults. The CLI
//! overrides individual fields afterwards.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use das_types::DEFAULT_INSTANCE;
use das_util::{RetryPolicy, expand_tilde};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DAS_CLIENT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read client config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse client config {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Attempts per network call.
    pub retry: u32,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Token separator for plain output.
    pub separator: String,
    /// Instance used when the query does not name one.
    pub default_instance: String,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: 3,
            timeout_secs: 300,
            separator: " ".to_string(),
            default_instance: DEFAULT_INSTANCE.to_string(),
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Loads the configuration from its default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "client config not found; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.max(1),
            timeout: self.timeout(),
            ..RetryPolicy::default()
        }
    }
}

/// Get the default path of the client config document.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("das")
        .join("client.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ClientConfig::load_from(Path::new("/nonexistent/das/client.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.retry_policy().attempts, 3);
        assert_eq!(config.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"retry": 0, "separator": ","}"#).unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(path.to_str().unwrap()), || {
            let config = ClientConfig::load().unwrap();
            assert_eq!(config.separator, ",");
            assert_eq!(config.default_instance, "prod/global");
            assert_eq!(config.retry_policy().attempts, 1);
        });
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, "{retry:").unwrap();
        let error = ClientConfig::load_from(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }), "{error}");
    }
}
