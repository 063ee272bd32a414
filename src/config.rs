//! lampctl configuration
//!
//! Loaded from `$XDG_CONFIG_HOME/lampctl/config.toml`, written with
//! defaults on first use. Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lamp_control::{HubConfig, ViewerConfig};
use lamp_transport::protocol::timing;
use lamp_transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("serialize defaults: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub hub: HubSection,
    pub viewer: ViewerConfig,
}

/// Link timeouts and retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub scan_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: timing::CONNECT_TIMEOUT_MS,
            write_timeout_ms: timing::WRITE_TIMEOUT_MS,
            retry_attempts: timing::WRITE_ATTEMPTS,
            retry_backoff_ms: timing::RETRY_BACKOFF_MS,
            scan_timeout_ms: timing::SCAN_TIMEOUT_MS,
        }
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub client_queue_size: usize,
    pub command_queue_size: usize,
}

impl Default for HubSection {
    fn default() -> Self {
        let defaults = HubConfig::default();
        Self {
            client_queue_size: defaults.client_queue_size,
            command_queue_size: defaults.command_queue_size,
        }
    }
}

impl HubSection {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            client_queue_size: self.client_queue_size,
            command_queue_size: self.command_queue_size,
        }
    }
}

impl Config {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let io_err = |source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let defaults = toml::to_string_pretty(&Self::default())?;
            std::fs::write(path, defaults).map_err(io_err)?;
            eprintln!("Created default config: {}", path.display());
        }
        Self::load(path)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_or_create(&default_path())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "link.retry_attempts must be at least 1".into(),
            ));
        }
        if self.hub.client_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "hub.client_queue_size must be at least 1".into(),
            ));
        }
        self.viewer
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("viewer: {e}")))
    }
}

pub fn default_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn config_dir() -> PathBuf {
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(config).join("lampctl")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config/lampctl")
    } else {
        PathBuf::from("/tmp/lampctl")
    }
}
