//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Background worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Milliseconds between supervisor ticks
    #[serde(default = "default_supervisor_interval_ms")]
    pub supervisor_interval_ms: u64,

    /// Discovery runs only while the queue is shorter than this
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    /// Files fetched per discovery query
    #[serde(default = "default_discovery_batch_size")]
    pub discovery_batch_size: usize,

    /// In-progress rows older than this are considered abandoned
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Seconds between stale sweeps
    #[serde(default = "default_stale_sweep_interval_secs")]
    pub stale_sweep_interval_secs: u64,

    /// Failed rows at this attempt count are left failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait for in-flight work on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Capacity of the host/worker message channels
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Relative path prefixes the worker never digests; copied from `library.excluded-prefixes`
    #[serde(skip)]
    pub excluded_prefixes: Vec<String>,
}

fn default_supervisor_interval_ms() -> u64 {
    30_000
}

fn default_low_water_mark() -> usize {
    10
}

fn default_discovery_batch_size() -> usize {
    100
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_stale_sweep_interval_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_channel_buffer() -> usize {
    256
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            supervisor_interval_ms: default_supervisor_interval_ms(),
            low_water_mark: default_low_water_mark(),
            discovery_batch_size: default_discovery_batch_size(),
            stale_after_secs: default_stale_after_secs(),
            stale_sweep_interval_secs: default_stale_sweep_interval_secs(),
            max_attempts: default_max_attempts(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            channel_buffer: default_channel_buffer(),
            excluded_prefixes: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Whether a relative path sits under an excluded prefix
    pub fn is_excluded(&self, path: &str) -> bool {
        crate::config::is_excluded(&self.excluded_prefixes, path)
    }
}
