use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meshmon_config::NetworkConfig;
use meshmon_store::SharedStore;
use meshmon_types::{NetworkId, NodeId, ReplacementType, Timestamp};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::proto;

/// Transport-level liveness, independent of the pulse-driven
/// `node_status_table` (spec §4.6): a peer is UNKNOWN until its first
/// heartbeat round trips, then ONLINE/OFFLINE by whether a response arrived
/// within `poll_rate * retry` of the last one sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PingStatus {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingEntry {
    pub status: PingStatus,
    pub rtt_secs: f64,
    pub date: Timestamp,
}

struct PeerTiming {
    last_sent: Option<Timestamp>,
    last_response: Option<Timestamp>,
}

/// Emits periodic `Heartbeat` packets to every connected peer and derives
/// `ping_data` liveness from `HeartbeatResponse` arrivals (spec §4.6,
/// grounded on the original heartbeat loop's poll-and-mark-stale design).
pub struct HeartbeatController {
    store: Arc<SharedStore>,
    manager: Arc<ConnectionManager>,
    network_id: NetworkId,
    timing: Mutex<HashMap<NodeId, PeerTiming>>,
}

impl HeartbeatController {
    pub fn new(store: Arc<SharedStore>, manager: Arc<ConnectionManager>, network_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store,
            manager,
            network_id: network_id.into(),
            timing: Mutex::new(HashMap::new()),
        })
    }

    fn needs_heartbeat(&self, node_id: &str, poll_rate_secs: f64, now: Timestamp) -> bool {
        #[allow(clippy::unwrap_used)]
        let timing = self.timing.lock().unwrap();
        match timing.get(node_id).and_then(|t| t.last_sent) {
            Some(last) => (now - last).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0 > poll_rate_secs,
            None => true,
        }
    }

    fn mark_sent(&self, node_id: &str, now: Timestamp) {
        #[allow(clippy::unwrap_used)]
        let mut timing = self.timing.lock().unwrap();
        timing
            .entry(node_id.to_string())
            .or_insert(PeerTiming { last_sent: None, last_response: None })
            .last_sent = Some(now);
    }

    /// Records a `HeartbeatResponse` arriving from `node_id` and republishes
    /// an ONLINE `ping_data` entry with the measured round-trip time.
    pub fn record_response(&self, node_id: &str, sent_at_node_time: i64) {
        let now = chrono::Utc::now();
        #[allow(clippy::unwrap_used)]
        {
            self.timing
                .lock()
                .unwrap()
                .entry(node_id.to_string())
                .or_insert(PeerTiming { last_sent: None, last_response: None })
                .last_response = Some(now);
        }
        let rtt_secs = (now.timestamp_nanos_opt().unwrap_or(0) - sent_at_node_time) as f64 / 1_000_000_000.0;
        self.store.own_context::<PingEntry>("ping_data").set(
            node_id,
            PingEntry { status: PingStatus::Online, rtt_secs: rtt_secs.max(0.0), date: now },
            ReplacementType::Newer,
        );
        meshmon_telemetry::metrics().set_peer_online(&self.network_id, node_id, true);
    }

    fn mark_offline_if_stale(&self, node_id: &str, poll_rate_secs: f64, retry: u32, now: Timestamp) {
        #[allow(clippy::unwrap_used)]
        let last_response = self.timing.lock().unwrap().get(node_id).and_then(|t| t.last_response);
        let Some(last_response) = last_response else { return };
        let elapsed = (now - last_response).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0;
        if elapsed <= poll_rate_secs * retry as f64 {
            return;
        }
        let already_offline = self
            .store
            .own_context::<PingEntry>("ping_data")
            .get(node_id)
            .ok()
            .flatten()
            .is_some_and(|e| e.status == PingStatus::Offline);
        if already_offline {
            return;
        }
        self.store.own_context::<PingEntry>("ping_data").set(
            node_id,
            PingEntry { status: PingStatus::Offline, rtt_secs: -1.0, date: now },
            ReplacementType::Newer,
        );
        meshmon_telemetry::metrics().set_peer_online(&self.network_id, node_id, false);
    }

    /// One tick: sends any heartbeats that are due and marks stale peers
    /// offline. Intended to be called on a fixed interval by the owning node
    /// binary (spec §5's suspension-point model: the caller owns the clock).
    pub fn tick(&self, peers: &[(NodeId, NetworkConfig)]) {
        let now = chrono::Utc::now();
        for (node_id, network) in peers {
            let Some(peer_cfg) = network.node_config.iter().find(|n| &n.node_id == node_id) else {
                continue;
            };
            let Some(connection) = self.manager.get(node_id, &self.network_id) else {
                continue;
            };
            if !connection.is_active() {
                continue;
            }
            if self.needs_heartbeat(node_id, peer_cfg.poll_rate, now) {
                if let Some(validator) = connection.validator() {
                    let signed = validator.sign(self.store.key_mapping().signer());
                    let packet = proto::Packet {
                        kind: Some(proto::packet::Kind::Heartbeat(proto::Heartbeat {
                            validator: crate::validator::encode(&signed).unwrap_or_default(),
                            node_time: now.timestamp_nanos_opt().unwrap_or(0),
                        })),
                    };
                    if connection.send(packet) {
                        self.mark_sent(node_id, now);
                    }
                }
            }
            self.mark_offline_if_stale(node_id, peer_cfg.poll_rate, peer_cfg.retry, now);
        }
    }
}
