//! Application configuration management.
//!
//! Configuration is persisted as TOML. Every section and field has a
//! default, so a partial (or missing) file still yields a usable config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::constants::{DEFAULT_ASSET_FETCH_COUNT, DEFAULT_DB_FILE};
use crate::error::{PlError, PlResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Asset collection scan settings.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Ephemeral message settings.
    #[serde(default)]
    pub ephemeral: EphemeralConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. If empty, uses default location.
    #[serde(default)]
    pub path: String,

    /// Enable WAL (Write-Ahead Logging) mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Maximum number of connections in the pool. Each execution context
    /// holds one connection for its whole lifetime.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Run integrity check on startup.
    #[serde(default = "default_true")]
    pub integrity_check_on_startup: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output for the file sink.
    #[serde(default)]
    pub json_output: bool,
}

/// Asset collection scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Messages fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Ephemeral message configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralConfig {
    /// Re-arm owed destruction timers when the contexts start.
    #[serde(default = "default_true")]
    pub restore_timers_on_startup: bool,

    /// Erase messages that belong to no conversation at startup.
    #[serde(default = "default_true")]
    pub purge_orphans_on_startup: bool,
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_ASSET_FETCH_COUNT
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            wal_mode: true,
            pool_size: default_pool_size(),
            integrity_check_on_startup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            restore_timers_on_startup: true,
            purge_orphans_on_startup: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path, falling back
    /// to defaults when no file exists.
    pub fn load_default() -> PlResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> PlResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> PlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| PlError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values that would make the data layer unusable.
    pub fn validate(&self) -> PlResult<()> {
        if self.collection.page_size == 0 {
            return Err(PlError::Config("collection.page_size must be at least 1".into()));
        }
        // Two connections are pinned by the UI and sync contexts.
        if self.database.pool_size < 2 {
            return Err(PlError::Config("database.pool_size must be at least 2".into()));
        }
        Ok(())
    }

    /// Default configuration file path.
    pub fn default_config_path() -> PlResult<PathBuf> {
        Ok(Platform::data_dir()?.join("config.toml"))
    }

    /// Effective database path, using the configured path or the default.
    pub fn effective_db_path(&self) -> PlResult<PathBuf> {
        if self.database.path.is_empty() {
            Ok(Platform::data_dir()?.join(DEFAULT_DB_FILE))
        } else {
            Ok(PathBuf::from(&self.database.path))
        }
    }

    /// Effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> PlResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone out the current configuration.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }
}
