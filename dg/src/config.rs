//! digestd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientConfig;
use crate::worker::WorkerConfig;

/// Main digestd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Library root and scanning
    pub library: LibraryConfig,

    /// Background worker tuning
    pub worker: WorkerConfig,

    /// Host-side worker supervision
    pub client: ClientConfig,

    /// Built-in digester settings
    pub digesters: DigestersConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_attempts == 0 {
            return Err(eyre::eyre!("worker.max-attempts must be at least 1"));
        }
        if self.worker.supervisor_interval_ms == 0 {
            return Err(eyre::eyre!("worker.supervisor-interval-ms must be greater than 0"));
        }
        if self.worker.discovery_batch_size == 0 {
            return Err(eyre::eyre!("worker.discovery-batch-size must be greater than 0"));
        }
        if self.worker.channel_buffer == 0 {
            return Err(eyre::eyre!("worker.channel-buffer must be greater than 0"));
        }
        if self.library.scan_interval_secs == 0 {
            return Err(eyre::eyre!("library.scan-interval-secs must be greater than 0"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .digestd.yml
        let local_config = PathBuf::from(".digestd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/digestd/digestd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("digestd").join("digestd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("digestd")
                .join("digests.db"),
        }
    }
}

/// Library root and scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory whose files are catalogued and digested
    pub root: PathBuf,

    /// Relative path prefixes never catalogued or digested
    #[serde(rename = "excluded-prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// Seconds between catalog rescans
    #[serde(rename = "scan-interval-secs")]
    pub scan_interval_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("digestd-library"),
            excluded_prefixes: vec![".git/".to_string(), ".digestd/".to_string()],
            scan_interval_secs: 30,
        }
    }
}

impl LibraryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Whether a library-relative path sits under one of the excluded prefixes
pub fn is_excluded(excluded: &[String], path: &str) -> bool {
    excluded
        .iter()
        .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
}

/// Built-in digester settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestersConfig {
    /// Bytes of a file read by `text-content`
    #[serde(rename = "text-max-bytes")]
    pub text_max_bytes: usize,
}

impl Default for DigestersConfig {
    fn default() -> Self {
        Self {
            text_max_bytes: 1024 * 1024,
        }
    }
}
