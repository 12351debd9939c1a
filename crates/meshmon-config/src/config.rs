use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_poll_rate() -> f64 {
    5.0
}
fn default_retry() -> u32 {
    3
}
fn default_monitor_interval() -> f64 {
    30.0
}
fn default_clock_pulse_interval() -> f64 {
    1.0
}
fn default_listen_addr() -> String {
    "127.0.0.1:0".to_string()
}
fn default_update_rate_limit_ms() -> u64 {
    200
}

/// One peer entry within a network's `node_config` list (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigEntry {
    pub node_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_poll_rate")]
    pub poll_rate: f64,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default)]
    pub allow: Option<BTreeSet<String>>,
    #[serde(default)]
    pub block: BTreeSet<String>,
}

/// An HTTP/ICMP probe target (spec §6); execution itself is an external
/// collaborator, this crate only carries the configuration shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub host: String,
    #[serde(default = "default_monitor_interval")]
    pub interval: f64,
    #[serde(default = "default_retry")]
    pub retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_clock_pulse_interval")]
    pub clock_pulse_interval: f64,
    /// Minimum spacing between outbound incremental-update sends triggered
    /// by `instant_update` events, in milliseconds; `0` disables throttling
    /// (spec §4.6.1).
    #[serde(default = "default_update_rate_limit_ms")]
    pub update_rate_limit_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clock_pulse_interval: default_clock_pulse_interval(),
            update_rate_limit_ms: default_update_rate_limit_ms(),
        }
    }
}

/// One named consistent-context this node joins, with the shared secret that
/// gates membership (spec §4.5: "parameters of a cluster: `cluster_name` and
/// a shared `secret`"). A network may have zero or more of these; a node
/// runs one `LeaderElectionHandler` per entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistentClusterConfig {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_id: String,
    pub node_id: String,
    /// Address this node's gRPC transport listens on for this network.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub node_config: Vec<NodeConfigEntry>,
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub consistent_clusters: Vec<ConsistentClusterConfig>,
}

/// The top-level configuration value pushed through the `ConfigBus` (spec §6).
/// Loading this from disk/Git and detecting external changes remain named
/// external-collaborator non-goals; this crate supplies only the shape and
/// the bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(s)
    }

    /// Reads and parses a config file. Watching the path for external
    /// changes and re-invoking this on reload is left to the caller (spec's
    /// config-fetch non-goal); this is a single synchronous load.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
