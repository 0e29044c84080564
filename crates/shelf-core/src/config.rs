//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/shelf/config.toml)
//! 3. Environment variables (SHELF_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::{StorageQuota, QUOTA_BYTES, QUOTA_BYTES_PER_ITEM};

/// Environment variable prefix
const ENV_PREFIX: &str = "SHELF";

pub const DEFAULT_DOCK_CAPACITY: usize = 8;
pub const MAX_DOCK_CAPACITY: usize = 20;
pub const DEFAULT_PAGE_SIZE: usize = 24;
pub const DEFAULT_CHUNK_BUDGET_BYTES: usize = 7_600;
pub const DEFAULT_LOCK_NAME: &str = "shelf-commit";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite sync area
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Initial dock capacity (0 disables the dock)
    #[serde(default = "default_dock_capacity")]
    pub dock_capacity: usize,

    /// Initial number of entries per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Byte budget of one chunk
    #[serde(default = "default_chunk_budget")]
    pub chunk_budget_bytes: usize,

    #[serde(default = "default_per_item_quota")]
    pub per_item_quota_bytes: usize,

    #[serde(default = "default_sync_quota")]
    pub sync_quota_bytes: usize,

    /// Total attempts of one commit, including the first
    #[serde(default = "default_max_attempts")]
    pub max_commit_attempts: u32,

    /// Sleep before retry `n` is `retry_backoff_ms * n`
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// How long an issued revision token is recognised as our own echo
    #[serde(default = "default_echo_expiry")]
    pub echo_expiry_ms: u64,

    /// Unreferenced chunk sets younger than this are left alone, since
    /// another writer may be about to activate them
    #[serde(default = "default_chunk_grace")]
    pub chunk_grace_ms: u64,

    /// Name of the cross-tab commit lock
    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    /// Log filter used by the CLI when SHELF_LOG is unset
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dock_capacity: default_dock_capacity(),
            page_size: default_page_size(),
            chunk_budget_bytes: default_chunk_budget(),
            per_item_quota_bytes: default_per_item_quota(),
            sync_quota_bytes: default_sync_quota(),
            max_commit_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            echo_expiry_ms: default_echo_expiry(),
            chunk_grace_ms: default_chunk_grace(),
            lock_name: default_lock_name(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SHELF_DATA_DIR, SHELF_DOCK_CAPACITY, ...)
    /// 2. Config file (~/.config/shelf/config.toml or SHELF_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.clamp();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.clamp();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_DOCK_CAPACITY", ENV_PREFIX)) {
            self.dock_capacity = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}_DOCK_CAPACITY: {:?}", ENV_PREFIX, val))?;
        }

        if let Ok(val) = std::env::var(format!("{}_PAGE_SIZE", ENV_PREFIX)) {
            self.page_size = val
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}_PAGE_SIZE: {:?}", ENV_PREFIX, val))?;
        }

        if let Ok(val) = std::env::var(format!("{}_LOCK_NAME", ENV_PREFIX)) {
            if !val.is_empty() {
                self.lock_name = val;
            }
        }

        Ok(())
    }

    fn clamp(&mut self) {
        self.dock_capacity = self.dock_capacity.min(MAX_DOCK_CAPACITY);
        self.page_size = self.page_size.max(1);
        self.max_commit_attempts = self.max_commit_attempts.max(1);
    }

    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Load from `path` when given, otherwise from the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SHELF_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelf")
            .join("config.toml")
    }

    /// Get the path to the SQLite sync area
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("shelf.db")
    }

    /// Quota enforced by the sync area
    pub fn quota(&self) -> StorageQuota {
        StorageQuota {
            per_item_bytes: self.per_item_quota_bytes,
            total_bytes: self.sync_quota_bytes,
        }
    }

    /// Engine tuning derived from this configuration
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            dock_capacity: self.dock_capacity,
            page_size: self.page_size,
            chunk_budget_bytes: self.chunk_budget_bytes,
            per_item_quota_bytes: self.per_item_quota_bytes,
            max_commit_attempts: self.max_commit_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            echo_expiry: Duration::from_millis(self.echo_expiry_ms),
            chunk_grace: Duration::from_millis(self.chunk_grace_ms),
            lock_name: self.lock_name.clone(),
        }
    }
}

/// Runtime knobs of the commit engine and store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Used until a `settings` record has been written
    pub dock_capacity: usize,
    pub page_size: usize,
    pub chunk_budget_bytes: usize,
    pub per_item_quota_bytes: usize,
    pub max_commit_attempts: u32,
    pub retry_backoff: Duration,
    pub echo_expiry: Duration,
    pub chunk_grace: Duration,
    pub lock_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine()
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelf")
}

fn default_dock_capacity() -> usize {
    DEFAULT_DOCK_CAPACITY
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_chunk_budget() -> usize {
    DEFAULT_CHUNK_BUDGET_BYTES
}

fn default_per_item_quota() -> usize {
    QUOTA_BYTES_PER_ITEM
}

fn default_sync_quota() -> usize {
    QUOTA_BYTES
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    100
}

fn default_echo_expiry() -> u64 {
    5_000
}

fn default_chunk_grace() -> u64 {
    10 * 60 * 1_000
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}
