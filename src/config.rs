//! Runtime configuration
//!
//! Loaded from an optional YAML file; anything it leaves out falls back to
//! defaults. Command-line flags are applied on top by the binary.
//!
//! ```yaml
//! db_path: /home/ada/.local/share/linkshelf/linkshelf.db
//! poll_interval_ms: 250
//! log_filter: linkshelf=debug
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database shared by every process of this user
    pub db_path: PathBuf,
    /// How often change-feed subscriptions poll the change log
    pub poll_interval_ms: u64,
    /// `tracing` filter used when `LINKSHELF_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            poll_interval_ms: 250,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load `path`, or the default location when `path` is `None`.
    ///
    /// A missing file at the default location yields the defaults; a
    /// missing file the caller named explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_yaml(&text).map_err(|e| match e {
                ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `<config_dir>/linkshelf/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("linkshelf").join("config.yaml"))
}

/// `<data_dir>/linkshelf/linkshelf.db`, falling back to `~/.local/share`
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("linkshelf").join("linkshelf.db")
}
