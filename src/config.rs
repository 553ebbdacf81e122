use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::processor::RetryPolicy;

/// Name of the sub-directory watched under the user's local data directory
/// when `watch.folder` is not set.
pub const DEFAULT_FOLDER_NAME: &str = "FolderToWatch";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    pub mongodb: MongoConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub disposal: DisposalConfig,
}

/// Watched folder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Directory whose `*.json` files are ingested. Defaults to
    /// `<local data dir>/FolderToWatch`.
    #[serde(default)]
    pub folder: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Sweep the folder again when the OS reports dropped notifications.
    #[serde(default = "default_rescan_on_overflow")]
    pub rescan_on_overflow: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            folder: None,
            log_level: default_log_level(),
            rescan_on_overflow: default_rescan_on_overflow(),
        }
    }
}

/// MongoDB sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    /// Environment variable holding the connection string
    #[serde(default = "default_uri_env")]
    pub uri_env: String,
    pub database: String,
    /// Per-insert timeout; no timeout when unset
    #[serde(default)]
    pub insert_timeout_ms: Option<u64>,
}

/// Retry budget shared by lock and database failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// What happens to a file once processing stops
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisposalConfig {
    /// Exhausted and rejected files are moved here instead of deleted
    #[serde(default)]
    pub reject_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rescan_on_overflow() -> bool {
    true
}

fn default_uri_env() -> String {
    "MONGODB_URI".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    5000
}

/// Resolve `<local data dir>/FolderToWatch` for the current user.
pub fn default_watch_folder() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.data_local_dir().join(DEFAULT_FOLDER_NAME))
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in MONGOWATCH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MONGOWATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path (still honours .env).
    pub fn load_from(config_path: &Path) -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if config.watch.folder.is_none() {
            config.watch.folder = default_watch_folder();
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let folder = match &self.watch.folder {
            Some(f) => f,
            None => anyhow::bail!(
                "watch.folder is not set and no local data directory could be determined"
            ),
        };

        if folder.exists() && !folder.is_dir() {
            anyhow::bail!(
                "watch.folder must be a directory, not a file: {}",
                folder.display()
            );
        }

        if self.mongodb.database.trim().is_empty() {
            anyhow::bail!("mongodb.database must not be empty");
        }

        std::env::var(&self.mongodb.uri_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your MongoDB connection string.",
                self.mongodb.uri_env
            )
        })?;

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than 0");
        }

        if let Some(reject_dir) = &self.disposal.reject_dir {
            if reject_dir == folder {
                anyhow::bail!(
                    "disposal.reject_dir must differ from watch.folder, otherwise rejected files would be ingested again"
                );
            }
        }

        Ok(())
    }

    /// Get the watched folder
    pub fn watch_folder(&self) -> &Path {
        // validate() guarantees the folder is resolved
        self.watch.folder.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Create the watched folder (and reject folder) if they do not exist yet.
    pub fn ensure_folders(&self) -> Result<()> {
        std::fs::create_dir_all(self.watch_folder()).with_context(|| {
            format!("Failed to create watch folder: {}", self.watch_folder().display())
        })?;
        if let Some(reject_dir) = &self.disposal.reject_dir {
            std::fs::create_dir_all(reject_dir).with_context(|| {
                format!("Failed to create reject folder: {}", reject_dir.display())
            })?;
        }
        Ok(())
    }

    /// Read the MongoDB connection string from the configured environment variable
    pub fn mongodb_uri(&self) -> Result<String> {
        std::env::var(&self.mongodb.uri_env)
            .with_context(|| format!("Environment variable {} not set", self.mongodb.uri_env))
    }

    pub fn insert_timeout(&self) -> Option<Duration> {
        self.mongodb.insert_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_millis(self.retry.delay_ms),
        }
    }
}
