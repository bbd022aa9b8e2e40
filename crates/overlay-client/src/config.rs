use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the per-user directory holding identity, config and caches.
pub const CONFIG_DIR_NAME: &str = ".softtseek";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Directory holding the identity key and profile
    pub config_dir: PathBuf,

    /// Bootstrap endpoints, e.g. `http://host:8080`
    pub bootstrap_nodes: Vec<String>,

    /// Relay endpoints, e.g. `relay://host:9000`
    pub relay_nodes: Vec<String>,

    /// Display name to apply to the identity on start, if any
    pub display_name: Option<String>,

    /// Bound on a single node handshake (connect + hello)
    pub probe_timeout_ms: u64,

    /// Bound on a single node query (search, lookup, online peers)
    pub query_timeout_ms: u64,

    /// Longest silence tolerated from a provider mid-transfer
    pub transfer_idle_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            config_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(CONFIG_DIR_NAME),
            bootstrap_nodes: Vec::new(),
            relay_nodes: Vec::new(),
            display_name: None,
            probe_timeout_ms: 3_000,
            query_timeout_ms: 10_000,
            transfer_idle_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_nodes(mut self, bootstrap_nodes: Vec<String>, relay_nodes: Vec<String>) -> Self {
        self.bootstrap_nodes = bootstrap_nodes;
        self.relay_nodes = relay_nodes;
        self
    }

    pub fn with_timeouts(mut self, probe: Duration, query: Duration) -> Self {
        self.probe_timeout_ms = probe.as_millis() as u64;
        self.query_timeout_ms = query.as_millis() as u64;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn transfer_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_idle_timeout_ms)
    }

    pub fn ensure_config_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)
    }
}
