use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use meshmon_types::{NetworkId, NodeId};
use tokio::sync::mpsc;

use crate::proto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Local,
    Remote,
}

impl Initiator {
    fn as_str(self) -> &'static str {
        match self {
            Initiator::Local => "local",
            Initiator::Remote => "remote",
        }
    }
}

/// One live gRPC stream to a peer (spec §4.6). A logical `Connection` may be
/// backed by zero or more of these at once, e.g. briefly during a dial/accept
/// race. Outbound packets are queued on `outbound` and drained by the tonic
/// response stream; inbound packets are handled directly off the request
/// stream by whichever task owns it.
pub struct RawConnection {
    pub network_id: NetworkId,
    pub dest_node_id: NodeId,
    pub initiator: Initiator,
    outbound: mpsc::UnboundedSender<proto::Packet>,
    closed: AtomicBool,
    established_at: Instant,
}

impl RawConnection {
    pub fn new(
        network_id: NetworkId,
        dest_node_id: NodeId,
        initiator: Initiator,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<proto::Packet>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        meshmon_telemetry::metrics().inc_connection_established(&network_id, &dest_node_id, initiator.as_str());
        let conn = Arc::new(Self {
            network_id,
            dest_node_id,
            initiator,
            outbound,
            closed: AtomicBool::new(false),
            established_at: Instant::now(),
        });
        (conn, rx)
    }

    pub fn send(&self, packet: proto::Packet) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(packet).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            meshmon_telemetry::metrics().inc_connection_closed(
                &self.network_id,
                &self.dest_node_id,
                self.initiator.as_str(),
                self.established_at.elapsed().as_secs_f64(),
            );
        }
    }
}

/// The logical connection to one peer on one network: zero or more
/// `RawConnection`s, written to round-robin (spec §4.6).
pub struct Connection {
    pub dest_node_id: NodeId,
    pub network_id: NetworkId,
    raw: Mutex<Vec<Arc<RawConnection>>>,
    selector: AtomicUsize,
    /// The handshake-negotiated validator for whichever `RawConnection` most
    /// recently completed its handshake — used by the heartbeat controller
    /// to sign packets sent via round-robin `send` (spec §4.6).
    validator: Mutex<Option<Arc<crate::validator::ConnectionValidator>>>,
}

impl Connection {
    fn new(dest_node_id: NodeId, network_id: NetworkId) -> Self {
        Self {
            dest_node_id,
            network_id,
            raw: Mutex::new(Vec::new()),
            selector: AtomicUsize::new(0),
            validator: Mutex::new(None),
        }
    }

    pub fn set_validator(&self, validator: Arc<crate::validator::ConnectionValidator>) {
        #[allow(clippy::unwrap_used)]
        {
            *self.validator.lock().unwrap() = Some(validator);
        }
    }

    pub fn validator(&self) -> Option<Arc<crate::validator::ConnectionValidator>> {
        #[allow(clippy::unwrap_used)]
        self.validator.lock().unwrap().clone()
    }

    pub fn add_raw_connection(&self, raw_conn: Arc<RawConnection>) {
        #[allow(clippy::unwrap_used)]
        self.raw.lock().unwrap().push(raw_conn);
    }

    pub fn remove_raw_connection(&self, raw_conn: &Arc<RawConnection>) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.raw.lock().unwrap();
        if let Some(pos) = guard.iter().position(|c| Arc::ptr_eq(c, raw_conn)) {
            let removed = guard.remove(pos);
            removed.close();
        }
    }

    pub fn is_active(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        self.raw.lock().unwrap().iter().any(|c| !c.is_closed())
    }

    pub fn send(&self, packet: proto::Packet) -> bool {
        #[allow(clippy::unwrap_used)]
        let guard = self.raw.lock().unwrap();
        if guard.is_empty() {
            return false;
        }
        let idx = self.selector.fetch_add(1, Ordering::SeqCst) % guard.len();
        #[allow(clippy::indexing_slicing)]
        guard[idx].send(packet)
    }

    pub fn close(&self) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.raw.lock().unwrap();
        for raw in guard.iter() {
            raw.close();
        }
        guard.clear();
    }
}

/// Registry of logical connections keyed by `(dest_node_id, network_id)`
/// (spec §4.6).
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<(NodeId, NetworkId), Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, node_id: &str, network_id: &str) -> Option<Arc<Connection>> {
        #[allow(clippy::unwrap_used)]
        self.connections
            .lock()
            .unwrap()
            .get(&(node_id.to_string(), network_id.to_string()))
            .cloned()
    }

    pub fn get_or_insert(&self, dest_node_id: NodeId, network_id: NetworkId) -> Arc<Connection> {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.connections.lock().unwrap();
        guard
            .entry((dest_node_id.clone(), network_id.clone()))
            .or_insert_with(|| Arc::new(Connection::new(dest_node_id, network_id)))
            .clone()
    }

    pub fn remove(&self, node_id: &str, network_id: &str) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.connections.lock().unwrap();
        if let Some(conn) = guard.remove(&(node_id.to_string(), network_id.to_string())) {
            conn.close();
        }
    }

    pub fn iter(&self) -> Vec<Arc<Connection>> {
        #[allow(clippy::unwrap_used)]
        self.connections.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_raw_connections() {
        let (raw1, _rx1) = RawConnection::new("mesh-a".into(), "b".into(), Initiator::Local);
        let (raw2, _rx2) = RawConnection::new("mesh-a".into(), "b".into(), Initiator::Local);
        let conn = Connection::new("b".into(), "mesh-a".into());
        conn.add_raw_connection(raw1);
        conn.add_raw_connection(raw2);

        assert!(conn.send(proto::Packet { kind: None }));
        assert!(conn.send(proto::Packet { kind: None }));
        assert!(conn.is_active());
    }

    #[test]
    fn removed_raw_connection_is_closed() {
        let (raw, _rx) = RawConnection::new("mesh-a".into(), "b".into(), Initiator::Remote);
        let conn = Connection::new("b".into(), "mesh-a".into());
        conn.add_raw_connection(raw.clone());
        conn.remove_raw_connection(&raw);
        assert!(raw.is_closed());
        assert!(!conn.is_active());
    }

    #[test]
    fn manager_returns_the_same_connection_for_the_same_key() {
        let manager = ConnectionManager::new();
        let a = manager.get_or_insert("b".to_string(), "mesh-a".to_string());
        let b = manager.get_or_insert("b".to_string(), "mesh-a".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.get("b", "mesh-a").is_some());
        manager.remove("b", "mesh-a");
        assert!(manager.get("b", "mesh-a").is_none());
    }
}
