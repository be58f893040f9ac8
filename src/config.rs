//! Configuration management for the table log
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (tablelog.toml)
//! - Environment variables (TABLELOG__*)
//!
//! ## Example config file (tablelog.toml):
//! ```toml
//! [store]
//! backend = "file"
//! path = "./tables"
//!
//! [retention]
//! minimum_hours = 168
//! check_enabled = true
//!
//! [commit]
//! max_retries = 3
//! client_info = "ingest-worker"
//!
//! [checkpoint]
//! interval = 10
//!
//! [table]
//! default_format = "parquet"
//! target_file_size = 134217728
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, TableError};

/// Main configuration for the table log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableLogConfig {
    /// Commit storage settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Vacuum safety settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Commit settings
    #[serde(default)]
    pub commit: CommitConfig,

    /// Checkpoint settings
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Defaults for new tables
    #[serde(default)]
    pub table: TableDefaults,
}

/// Which persistence provider backs the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory of the file store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Smallest vacuum retention accepted without `force`
    #[serde(default = "default_minimum_hours")]
    pub minimum_hours: i64,

    /// When false, any retention is accepted
    #[serde(default = "default_true")]
    pub check_enabled: bool,
}

/// Commit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Retries after a conflicting commit before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Provenance string stamped on commits
    #[serde(default)]
    pub client_info: Option<String>,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Write a checkpoint every N versions; 0 disables
    #[serde(default = "default_checkpoint_interval")]
    pub interval: u64,
}

/// Defaults for new tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefaults {
    /// Storage format tag recorded on create
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Target size of files produced by optimize
    #[serde(default = "default_target_file_size")]
    pub target_file_size: u64,
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("./tables")
}

fn default_true() -> bool {
    true
}

fn default_minimum_hours() -> i64 {
    168
}

fn default_max_retries() -> u32 {
    3
}

fn default_checkpoint_interval() -> u64 {
    10
}

fn default_format() -> String {
    "parquet".to_string()
}

fn default_target_file_size() -> u64 {
    128 * 1024 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: default_store_path(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            minimum_hours: default_minimum_hours(),
            check_enabled: true,
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            client_info: None,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: default_checkpoint_interval(),
        }
    }
}

impl Default for TableDefaults {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            target_file_size: default_target_file_size(),
        }
    }
}

impl TableLogConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["tablelog.toml", ".tablelog.toml", "config/tablelog.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "tablelog") {
            let xdg_config = config_dir.config_dir().join("tablelog.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (TABLELOG__*)
        builder = builder.add_source(
            Environment::with_prefix("TABLELOG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject settings the log cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::File && self.store.path.as_os_str().is_empty() {
            return Err(TableError::validation("store.path must be set for the file backend"));
        }
        if self.retention.minimum_hours < 0 {
            return Err(TableError::validation("retention.minimum_hours cannot be negative"));
        }
        if self.retention.minimum_hours > 24 * 366 {
            return Err(TableError::validation(format!(
                "retention.minimum_hours of {} exceeds one year",
                self.retention.minimum_hours
            )));
        }
        if self.table.target_file_size == 0 {
            return Err(TableError::validation("table.target_file_size must be positive"));
        }
        Ok(())
    }

    /// Get the store path (resolves relative paths)
    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.store.path)
        }
    }
}
