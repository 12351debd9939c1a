#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Configuration shape consumed across the cluster and the publish/subscribe
//! bus components use to derive a live view over it. Loading the initial
//! file, watching it (or a Git remote) for external changes, and triggering
//! `ConfigBus::new_config` on a change are all left to the binary crate that
//! wires everything together.

mod bus;
mod config;
mod error;

pub use bus::{ConfigBus, ConfigPreprocessor, ConfigWatcher};
pub use config::{
    ClusterConfig, Config, ConsistentClusterConfig, MonitorConfig, NetworkConfig, NodeConfigEntry,
};
pub use error::ConfigError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_network_with_defaults() {
        let toml = r#"
            [networks.mesh-a]
            network_id = "mesh-a"
            node_id = "n1"

            [[networks.mesh-a.node_config]]
            node_id = "n2"
        "#;
        let config = Config::from_toml_str(toml).expect("parses");
        let network = config.networks.get("mesh-a").expect("network present");
        assert_eq!(network.node_id, "n1");
        let peer = network.node_config.first().expect("one peer");
        assert_eq!(peer.node_id, "n2");
        assert_eq!(peer.poll_rate, 5.0);
        assert_eq!(peer.retry, 3);
        assert_eq!(network.cluster.clock_pulse_interval, 1.0);
    }

    #[test]
    fn load_from_path_reports_io_error_for_missing_file() {
        let err = Config::load_from_path("/nonexistent/meshmon.toml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
