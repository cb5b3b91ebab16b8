//! Host configuration
//!
//! All settings have defaults; a JSON file may override any subset.
//!
//! ```text
//! <data_dir>/
//!   plugins/<id>/         installed plugin files
//!   plugins-data.json     installed-plugin registry
//!   unihub.redb           per-plugin KV, favorites, recents
//!   .staging/             scratch space for in-flight installs
//!   audit.jsonl           audit trail (when a file sink is used)
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PLUGINS_DIR: &str = "plugins";
pub const PLUGINS_DATA_FILE: &str = "plugins-data.json";
pub const KV_DATABASE_FILE: &str = "unihub.redb";
pub const STAGING_DIR: &str = ".staging";
pub const AUDIT_LOG_FILE: &str = "audit.jsonl";

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Download retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before retry `n` is `base_delay_ms * n`
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Configuration for the plugin host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root of all persisted host state
    pub data_dir: PathBuf,
    /// Maximum number of materialized plugin views
    pub max_cached_views: usize,
    /// Quiet period before queued bounds updates are applied
    pub bounds_debounce_ms: u64,
    pub download: RetryPolicy,
    /// Default timeout for spawned sidecar processes
    pub spawn_timeout_ms: u64,
    pub clipboard_poll_ms: u64,
    pub dev_reload_debounce_ms: u64,
    /// Version reported to plugins through `system.info`
    pub app_version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(".unihub"))
    }
}

impl HostConfig {
    /// Create a configuration rooted at `data_dir` with default settings
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_cached_views: 5,
            bounds_debounce_ms: 50,
            download: RetryPolicy::default(),
            spawn_timeout_ms: 30_000,
            clipboard_poll_ms: 500,
            dev_reload_debounce_ms: 300,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Configuration in the platform data directory for an application
    pub fn default_for_app(app_name: &str) -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
        Self::new(base.join(app_name))
    }

    /// Load overrides from a JSON file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join(PLUGINS_DIR)
    }

    /// Private directory of one plugin (its install directory)
    pub fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.plugins_dir().join(plugin_id)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(PLUGINS_DATA_FILE)
    }

    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join(KV_DATABASE_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join(AUDIT_LOG_FILE)
    }

    pub fn bounds_debounce(&self) -> Duration {
        Duration::from_millis(self.bounds_debounce_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn clipboard_poll_interval(&self) -> Duration {
        Duration::from_millis(self.clipboard_poll_ms.max(1))
    }

    pub fn dev_reload_debounce(&self) -> Duration {
        Duration::from_millis(self.dev_reload_debounce_ms)
    }
}
