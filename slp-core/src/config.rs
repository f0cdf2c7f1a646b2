//! Runtime configuration.
//!
//! All fields have defaults, so an empty TOML document is a valid config:
//!
//! ```toml
//! storage_path = "/var/lib/slp/counter.bin"
//! lock_timeout_ms = 5000
//! on_corrupt = "reject"
//!
//! [dormancy]
//! min_idle_ms = 60000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the counter record, relative to the working directory.
pub const DEFAULT_STORAGE_PATH: &str = ".slp_secure_storage.bin";

/// How the counter store treats an existing record it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    /// Read the counter as 0 and log the event (first-run semantics)
    Bootstrap,
    /// Treat the record as tamper evidence and fail every read
    Reject,
}

/// Configuration for a [`crate::Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlpConfig {
    /// Path of the durable counter record
    pub storage_path: PathBuf,
    /// Maximum wait for the counter critical section (milliseconds)
    pub lock_timeout_ms: u64,
    /// Behaviour on an unparsable counter record
    pub on_corrupt: CorruptionPolicy,
    /// Dormancy policy settings
    pub dormancy: DormancyConfig,
}

impl Default for SlpConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            lock_timeout_ms: 5_000,
            on_corrupt: CorruptionPolicy::Bootstrap,
            dormancy: DormancyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DormancyConfig {
    /// Minimum idle time since the last issuance; 0 disables the check
    pub min_idle_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl SlpConfig {
    /// Config with a custom storage path and defaults elsewhere.
    pub fn with_storage_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: path.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn min_idle(&self) -> Duration {
        Duration::from_millis(self.dormancy.min_idle_ms)
    }
}
