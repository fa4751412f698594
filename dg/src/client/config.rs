//! Worker client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host-side worker supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Delay before respawning a worker that exited unexpectedly
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// How long `start` waits for the worker to report ready
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

fn default_restart_delay_ms() -> u64 {
    5_000
}

fn default_ready_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
