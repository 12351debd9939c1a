use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use meshmon_dispatch::{PathMatcher, UpdateHandler, UpdateManager};
use meshmon_store::{IncrementalUpdater, SharedStore};
use meshmon_types::NodeId;

use crate::connection::ConnectionManager;
use crate::proto;

/// Merges an incoming `StoreUpdate` payload into the local store and wakes
/// the dispatch engine over whatever paths changed (spec §4.6, grounded on
/// the original update handler's `handle_incoming_update`). Carries the
/// node's own consistent-cluster secrets so incoming leader-election
/// envelopes verify during the merge, not just loose values and contexts.
pub struct IncomingUpdateHandler {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    cluster_secrets: BTreeMap<String, String>,
}

impl IncomingUpdateHandler {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<UpdateManager>,
        cluster_secrets: BTreeMap<String, String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            manager,
            cluster_secrets,
        })
    }

    pub fn handle(&self, data: serde_json::Value) {
        match self.store.update_from_dump_with_secrets(data, &self.cluster_secrets) {
            Ok(changed) if !changed.is_empty() => {
                let paths: Vec<String> = changed.into_iter().map(|p| p.to_string()).collect();
                self.manager.trigger_update(paths);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to merge incoming store update"),
        }
    }
}

/// Ships the incremental difference of the local store to every connected
/// peer on the `update`/`instant_update` events (spec §4.2/§4.6), once the
/// update queue has quiesced. One `IncrementalUpdater` is kept per peer so a
/// slow or disconnected peer never blocks another's delivery, and a peer's
/// baseline is forgotten whenever its connection drops so the next
/// send-after-reconnect carries the whole store again.
pub struct OutgoingUpdateHandler {
    store: Arc<SharedStore>,
    manager: Arc<ConnectionManager>,
    network_id: String,
    matcher: PathMatcher,
    updaters: Mutex<HashMap<NodeId, Arc<IncrementalUpdater>>>,
}

impl OutgoingUpdateHandler {
    pub fn new(store: Arc<SharedStore>, manager: Arc<ConnectionManager>, network_id: impl Into<String>) -> Arc<Self> {
        let matcher = PathMatcher::Any(vec![PathMatcher::exact("update"), PathMatcher::exact("instant_update")]);
        Arc::new(Self {
            store,
            manager,
            network_id: network_id.into(),
            matcher,
            updaters: Mutex::new(HashMap::new()),
        })
    }

    /// Drops the incremental baseline for `peer`, forcing its next diff to
    /// carry the whole store. Called when a peer's connection is torn down.
    pub fn forget_peer(&self, peer: &str) {
        #[allow(clippy::unwrap_used)]
        self.updaters.lock().unwrap().remove(peer);
    }

    fn updater_for(&self, peer: &str) -> Arc<IncrementalUpdater> {
        #[allow(clippy::unwrap_used)]
        self.updaters
            .lock()
            .unwrap()
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(IncrementalUpdater::new()))
            .clone()
    }
}

impl UpdateHandler for OutgoingUpdateHandler {
    fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    fn handle_update(&self) {
        let snapshot = self.store.snapshot();
        for connection in self.manager.iter() {
            if connection.network_id != self.network_id || !connection.is_active() {
                continue;
            }
            let Some(validator) = connection.validator() else { continue };
            let updater = self.updater_for(&connection.dest_node_id);
            let Some(diff) = updater.diff(&snapshot, &connection.dest_node_id) else { continue };
            let Ok(data) = serde_json::to_string(&diff) else { continue };
            let signed = validator.sign(self.store.key_mapping().signer());
            let Ok(encoded_validator) = crate::validator::encode(&signed) else { continue };
            let packet = proto::Packet {
                kind: Some(proto::packet::Kind::StoreUpdate(proto::StoreUpdate {
                    validator: encoded_validator,
                    data,
                })),
            };
            let bytes = prost::Message::encoded_len(&packet) as u64;
            if connection.send(packet) {
                updater.ack(&snapshot);
                meshmon_telemetry::metrics().inc_packet_sent(&self.network_id, &connection.dest_node_id, "store_update", bytes);
            }
        }
    }
}
