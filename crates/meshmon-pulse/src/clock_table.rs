use std::sync::Arc;

use meshmon_dispatch::{PathMatcher, UpdateHandler, UpdateManager};
use meshmon_model::{ClockTableEntry, PulseTableEntry};
use meshmon_store::SharedStore;

/// Watches every peer's record of *this* node's pulses and turns the
/// round-trip back into an RTT/offset estimate (spec §4.4):
///
/// ```text
/// elapsed   = now() - P.pulse_table[self].current_pulse
/// half_rtt  = elapsed / 2
/// arrival   = P.pulse_table[self].current_pulse + half_rtt
/// delta     = arrival - P.pulse_table[self].current_time
/// rtt       = 2 * half_rtt
/// ```
pub struct ClockTableHandler {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    matcher: PathMatcher,
    pulse_interval_secs: f64,
    network_id: String,
}

impl ClockTableHandler {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<UpdateManager>,
        pulse_interval_secs: f64,
        network_id: impl Into<String>,
    ) -> Arc<Self> {
        let pattern = format!(
            r"^nodes\.[\w-]+\.consistency\.pulse_table\.{}$",
            regex::escape(store.node_id())
        );
        #[allow(clippy::unwrap_used)]
        let matcher = PathMatcher::regex(&[&pattern]).unwrap();
        Arc::new(Self {
            store,
            manager,
            matcher,
            pulse_interval_secs,
            network_id: network_id.into(),
        })
    }

    fn peer_entry_for_self(&self, peer: &str) -> Option<PulseTableEntry> {
        let self_id = self.store.node_id().clone();
        self.store
            .with_node_consistency(peer, |c| {
                c.pulse_table
                    .get(&self_id)
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
}

impl UpdateHandler for ClockTableHandler {
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
            let Some(entry) = self.peer_entry_for_self(&peer) else {
                continue;
            };
            if self
                .own_clock_entry(&peer)
                .is_some_and(|c| c.last_pulse == entry.current_pulse)
            {
                continue;
            }

            let elapsed = now - entry.current_pulse;
            let elapsed_secs = elapsed.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
            let half_rtt_secs = elapsed_secs / 2.0;
            let arrival =
                entry.current_pulse + chrono::Duration::microseconds((half_rtt_secs * 1_000_000.0) as i64);
            let delta = arrival - entry.current_time;
            let delta_secs = delta.num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
            let rtt_secs = 2.0 * half_rtt_secs;

            meshmon_telemetry::metrics().observe_rtt(&self.network_id, &peer, rtt_secs);
            meshmon_telemetry::metrics().observe_delta(&self.network_id, &peer, delta_secs);

            let clock_entry = ClockTableEntry {
                last_pulse: entry.current_pulse,
                pulse_interval: self.pulse_interval_secs,
                delta_secs,
                rtt_secs,
                remote_time: entry.current_time,
            };
            let node_id = self.store.node_id().clone();
            let write = self.store.with_consistency_mut(|signer, consistency| {
                consistency.set_clock_table_entry(signer, &peer, clock_entry);
            });
            if let Err(e) = write {
                tracing::warn!(peer = %peer, error = %e, "cannot record clock table entry");
                continue;
            }
            changed_paths.push(format!("nodes.{node_id}.consistency.clock_table.{peer}"));
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
    use meshmon_model::PulseTableEntry;
    use std::collections::BTreeSet;

    fn node(node_id: &str, peers: &[meshmon_crypto::Verifier]) -> (Arc<SharedStore>, meshmon_crypto::Signer) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-clock-table-test-{}-{node_id}", std::process::id()));
        let signer = key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate");
        let mut key_mapping = KeyMapping::new(signer.clone());
        for peer in peers {
            key_mapping.add_verifier(peer.clone());
        }
        (Arc::new(SharedStore::new(key_mapping)), signer)
    }

    #[test]
    fn matcher_only_matches_peer_tables_about_self() {
        let (store, _) = node("a", &[]);
        let manager = UpdateManager::new();
        let handler = ClockTableHandler::new(store, manager, 1.0, "mesh-a");
        assert!(handler
            .matcher()
            .matches("nodes.peer-1.consistency.pulse_table.a"));
        assert!(!handler
            .matcher()
            .matches("nodes.peer-1.consistency.pulse_table.other"));
    }

    #[test]
    fn handle_update_derives_rtt_and_delta_from_peer_echo() {
        let (store_b, signer_b) = node("b", &[]);
        let (store_a, signer_a) = node("a", &[signer_b.verifier()]);
        store_a.ensure_consistency(BTreeSet::from(["b".to_string()]));
        store_b.ensure_consistency(BTreeSet::from(["a".to_string()]));

        let sent = chrono::Utc::now() - chrono::Duration::milliseconds(100);
        let received = sent + chrono::Duration::milliseconds(40);
        store_b
            .with_consistency_mut(|signer, consistency| {
                consistency.set_pulse_table_entry(
                    signer,
                    "a",
                    PulseTableEntry {
                        current_pulse: sent,
                        current_time: received,
                    },
                );
            })
            .expect("node b has a consistency envelope");
        store_a.update(&store_b.snapshot());

        let manager = UpdateManager::new();
        let handler = ClockTableHandler::new(store_a.clone(), manager, 5.0, "mesh-a");
        handler.handle_update();

        let recorded = handler.own_clock_entry("b").expect("clock entry recorded");
        assert!(recorded.rtt_secs >= 0.0);
        let _ = signer_a;
    }
}
