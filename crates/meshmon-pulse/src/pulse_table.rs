use std::sync::Arc;

use meshmon_dispatch::{PathMatcher, UpdateHandler, UpdateManager};
use meshmon_model::PulseTableEntry;
use meshmon_store::SharedStore;

/// Watches every peer's `clock_pulse` and records, in the local node's own
/// `pulse_table`, the most recent pulse seen from each and the local
/// wall-clock time it was observed (spec §4.4).
pub struct PulseTableHandler {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    matcher: PathMatcher,
}

impl PulseTableHandler {
    pub fn new(store: Arc<SharedStore>, manager: Arc<UpdateManager>) -> Arc<Self> {
        #[allow(clippy::unwrap_used)]
        let matcher = PathMatcher::regex(&[r"^nodes\.[\w-]+\.consistency\.clock_pulse$"]).unwrap();
        Arc::new(Self {
            store,
            manager,
            matcher,
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
}

impl UpdateHandler for PulseTableHandler {
    fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    fn handle_update(&self) {
        let mut changed_paths = Vec::new();
        for peer in self.store.nodes() {
            let Some(peer_pulse_date) = self
                .store
                .with_node_consistency(&peer, |c| c.clock_pulse.as_ref().map(|b| b.date))
                .flatten()
            else {
                continue;
            };

            let already_current = self
                .own_pulse_entry(&peer)
                .is_some_and(|e| e.current_pulse == peer_pulse_date);
            if already_current {
                continue;
            }

            let entry = PulseTableEntry {
                current_pulse: peer_pulse_date,
                current_time: chrono::Utc::now(),
            };
            let node_id = self.store.node_id().clone();
            let write = self.store.with_consistency_mut(|signer, consistency| {
                consistency.set_pulse_table_entry(signer, &peer, entry);
            });
            if let Err(e) = write {
                tracing::warn!(peer = %peer, error = %e, "cannot record pulse table entry");
                continue;
            }
            changed_paths.push(format!("nodes.{node_id}.consistency.pulse_table.{peer}"));
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

    fn node(node_id: &str, peers: &[meshmon_crypto::Verifier]) -> (Arc<SharedStore>, meshmon_crypto::Signer) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("meshmon-pulse-test-{}-{node_id}", std::process::id()));
        let signer = key_files::generate_and_save(&dir, &node_id.to_string()).expect("generate");
        let mut key_mapping = KeyMapping::new(signer.clone());
        for peer in peers {
            key_mapping.add_verifier(peer.clone());
        }
        (Arc::new(SharedStore::new(key_mapping)), signer)
    }

    #[test]
    fn matcher_accepts_only_clock_pulse_paths() {
        let (store, _) = node("a", &[]);
        let manager = UpdateManager::new();
        let handler = PulseTableHandler::new(store, manager);
        assert!(handler
            .matcher()
            .matches("nodes.peer-1.consistency.clock_pulse"));
        assert!(!handler
            .matcher()
            .matches("nodes.peer-1.consistency.pulse_table.a"));
    }

    #[test]
    fn handle_update_records_a_fresh_peer_pulse() {
        let (store_b, signer_b) = node("b", &[]);
        let (store_a, _) = node("a", &[signer_b.verifier()]);
        store_a.ensure_consistency(BTreeSet::from(["b".to_string()]));
        store_b.ensure_consistency(BTreeSet::new());

        store_b
            .with_consistency_mut(|signer, consistency| consistency.emit_clock_pulse(signer))
            .expect("node b has a consistency envelope");
        store_a.update(&store_b.snapshot());

        let manager = UpdateManager::new();
        let handler = PulseTableHandler::new(store_a.clone(), manager);
        handler.handle_update();

        let recorded = handler.own_pulse_entry("b");
        assert!(recorded.is_some());
    }
}
