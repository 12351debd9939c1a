use std::sync::Arc;

use meshmon_dispatch::{PathMatcher, UpdateHandler, UpdateManager};
use meshmon_model::{ClockTableEntry, NodeStatus, NodeStatusEntry, PulseTableEntry};
use meshmon_store::SharedStore;

/// Safety margin multiplied onto a peer's measured RTT before its pulse is
/// considered overdue (spec §4.4: `T_pulse + rtt * epsilon`).
const STATUS_EPSILON: f64 = 3.0;

/// Derives ONLINE/OFFLINE for every peer from the pulse/clock tables this
/// node has already built: a peer is ONLINE iff its most recent pulse
/// arrived within `T_pulse + rtt * epsilon` of now; a peer missing either
/// table entry is OFFLINE.
pub struct NodeStatusHandler {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    matcher: PathMatcher,
    pulse_interval_secs: f64,
    network_id: String,
}

impl NodeStatusHandler {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<UpdateManager>,
        pulse_interval_secs: f64,
        network_id: impl Into<String>,
    ) -> Arc<Self> {
        let node_id = regex::escape(store.node_id());
        let pulse_pattern = format!(r"^nodes\.{node_id}\.consistency\.pulse_table\.");
        let clock_pattern = format!(r"^nodes\.{node_id}\.consistency\.clock_table\.");
        #[allow(clippy::unwrap_used)]
        let matcher = PathMatcher::regex(&[&pulse_pattern, &clock_pattern]).unwrap();
        Arc::new(Self {
            store,
            manager,
            matcher,
            pulse_interval_secs,
            network_id: network_id.into(),
        })
    }

    fn own_pulse_entry(&self, peer: &str) -> Option<PulseTableEntry> {
        self.store
            .with_node_consistency(self.store.node_id(), |c| {
                c.pulse_table
                    .get(peer)
                    .and_then(|b| serde_json::from_value::<PulseTableEntry>(b.data.clone()).ok())
            })
            .flatten()
    }

    fn own_clock_entry(&self, peer: &str) -> Option<ClockTableEntry> {
        self.store
            .with_node_consistency(self.store.node_id(), |c| {
                c.clock_table
                    .get(peer)
                    .and_then(|b| serde_json::from_value::<ClockTableEntry>(b.data.clone()).ok())
            })
            .flatten()
    }

    fn own_status_entry(&self, peer: &str) -> Option<NodeStatusEntry> {
        self.store
            .with_node_consistency(self.store.node_id(), |c| {
                c.node_status_table
                    .get(peer)
                    .and_then(|b| serde_json::from_value::<NodeStatusEntry>(b.data.clone()).ok())
            })
            .flatten()
    }
}

impl UpdateHandler for NodeStatusHandler {
    fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    fn handle_update(&self) {
        let now = chrono::Utc::now();
        let mut changed_paths = Vec::new();

        for peer in self.store.nodes() {
            if peer == *self.store.node_id() {
                continue;
            }
            let pulse_entry = self.own_pulse_entry(&peer);
            let clock_entry = self.own_clock_entry(&peer);

            let online = match (pulse_entry, clock_entry) {
                (Some(pulse), Some(clock)) => {
                    let elapsed = now - pulse.current_time;
                    let elapsed_secs = elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0;
                    let threshold = self.pulse_interval_secs + clock.rtt_secs * STATUS_EPSILON;
                    elapsed_secs <= threshold
                }
                _ => false,
            };
            let status = if online {
                NodeStatus::Online
            } else {
                NodeStatus::Offline
            };

            if self.own_status_entry(&peer).is_some_and(|e| e.status == status) {
                continue;
            }

            meshmon_telemetry::metrics().set_peer_online(&self.network_id, &peer, online);

            let node_id = self.store.node_id().clone();
            let write = self.store.with_consistency_mut(|signer, consistency| {
                consistency.set_node_status_entry(signer, &peer, status);
            });
            if let Err(e) = write {
                tracing::warn!(peer = %peer, error = %e, "cannot record node status entry");
                continue;
            }
            changed_paths.push(format!("nodes.{node_id}.consistency.node_status_table.{peer}"));
        }

        if !changed_paths.is_empty() {
            self.manager.trigger_update(changed_paths);
            self.manager.trigger_event("instant_update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmon_crypto::{key_files, KeyMapping};
    use std::collections::BTreeSet;

    fn node(node_id: &str, peers: &[meshmon_crypto::Verifier]) -> Arc<SharedStore> {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-node-status-test-{}-{node_id}", std::process::id()));
        let signer = key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate");
        let mut key_mapping = KeyMapping::new(signer);
        for peer in peers {
            key_mapping.add_verifier(peer.clone());
        }
        Arc::new(SharedStore::new(key_mapping))
    }

    #[test]
    fn peer_with_no_pulse_table_entry_is_offline() {
        let store = node("a", &[]);
        store.ensure_consistency(BTreeSet::from(["b".to_string()]));
        let manager = UpdateManager::new();
        let handler = NodeStatusHandler::new(store.clone(), manager, 2.0, "mesh-a");
        handler.handle_update();
        let status = handler.own_status_entry("b").expect("status recorded");
        assert_eq!(status.status, NodeStatus::Offline);
    }

    #[test]
    fn peer_with_a_recent_pulse_within_threshold_is_online() {
        let store = node("a", &[]);
        store.ensure_consistency(BTreeSet::from(["b".to_string()]));
        store
            .with_consistency_mut(|signer, consistency| {
                consistency.set_pulse_table_entry(
                    signer,
                    "b",
                    PulseTableEntry {
                        current_pulse: chrono::Utc::now(),
                        current_time: chrono::Utc::now(),
                    },
                );
                consistency.set_clock_table_entry(
                    signer,
                    "b",
                    ClockTableEntry {
                        last_pulse: chrono::Utc::now(),
                        pulse_interval: 2.0,
                        delta_secs: 0.01,
                        rtt_secs: 0.02,
                        remote_time: chrono::Utc::now(),
                    },
                );
            })
            .expect("node has a consistency envelope");

        let manager = UpdateManager::new();
        let handler = NodeStatusHandler::new(store.clone(), manager, 2.0, "mesh-a");
        handler.handle_update();
        let status = handler.own_status_entry("b").expect("status recorded");
        assert_eq!(status.status, NodeStatus::Online);
    }
}
