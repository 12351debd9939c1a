use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::transport::Endpoint;
use tonic::Request;

use meshmon_config::NodeConfigEntry;
use meshmon_dispatch::UpdateManager;
use meshmon_store::SharedStore;

use crate::connection::{ConnectionManager, Initiator, RawConnection};
use crate::heartbeat::HeartbeatController;
use crate::proto::{self, mesh_mon_service_client::MeshMonServiceClient};
use crate::router::PeerSession;
use crate::update::{IncomingUpdateHandler, OutgoingUpdateHandler};
use crate::validator::ConnectionValidator;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

fn normalize_address(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("grpc://") {
        format!("http://{rest}")
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Whether this node is permitted to dial `peer` (spec §4.6's dial policy):
/// the peer must have a configured URL, must not have blocked us, and if it
/// has an allow-list, we must be on it.
pub fn can_dial(self_id: &str, peer: &NodeConfigEntry) -> bool {
    peer.url.is_some()
        && !peer.block.contains(self_id)
        && peer.allow.as_ref().map_or(true, |allow| allow.contains(self_id))
}

/// Maintains outbound connections to every peer configured with a dialable
/// URL, reconnecting on a fixed interval when a connection is missing or has
/// gone inactive (spec §4.6's client dialler, grounded on the original
/// reconnect loop).
pub struct Dialler {
    store: Arc<SharedStore>,
    manager: Arc<ConnectionManager>,
    dispatch: Arc<UpdateManager>,
    heartbeats: Arc<HeartbeatController>,
    incoming: Arc<IncomingUpdateHandler>,
    outgoing: Arc<OutgoingUpdateHandler>,
    network_id: String,
}

impl Dialler {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<ConnectionManager>,
        dispatch: Arc<UpdateManager>,
        heartbeats: Arc<HeartbeatController>,
        incoming: Arc<IncomingUpdateHandler>,
        outgoing: Arc<OutgoingUpdateHandler>,
        network_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            manager,
            dispatch,
            heartbeats,
            incoming,
            outgoing,
            network_id: network_id.into(),
        })
    }

    /// Spawns the reconnect loop. `peers` is re-read from the config bus by
    /// the caller on every tick (config hot-reload lives one layer up, in
    /// the node binary).
    pub fn spawn(self: Arc<Self>, peers: impl Fn() -> Vec<NodeConfigEntry> + Send + Sync + 'static) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for peer in peers() {
                    if peer.node_id == *self.store.node_id() {
                        continue;
                    }
                    if !can_dial(self.store.node_id(), &peer) {
                        continue;
                    }
                    let already_active = self
                        .manager
                        .get(&peer.node_id, &self.network_id)
                        .is_some_and(|c| c.is_active());
                    if already_active {
                        continue;
                    }
                    let this = self.clone();
                    let node_id = peer.node_id.clone();
                    #[allow(clippy::unwrap_used)]
                    let address = normalize_address(peer.url.as_ref().unwrap());
                    tokio::spawn(async move {
                        if let Err(e) = this.connect_to(&node_id, &address).await {
                            tracing::debug!(peer = %node_id, address = %address, error = %e, "dial attempt failed");
                            meshmon_telemetry::metrics().inc_connection_failure(&this.network_id, &node_id, "dial_failed");
                            this.outgoing.forget_peer(&node_id);
                        }
                    });
                }
                tokio::time::sleep(RECONNECT_INTERVAL).await;
            }
        })
    }

    async fn connect_to(self: &Arc<Self>, peer_node_id: &str, address: &str) -> Result<(), crate::error::TransportError> {
        let Some(verifier) = self.store.key_mapping().get_verifier(peer_node_id).cloned() else {
            return Err(crate::error::TransportError::NoAddress(peer_node_id.to_string()));
        };

        let endpoint = Endpoint::from_shared(address.to_string())?;
        let channel = endpoint.connect().await?;
        let mut client = MeshMonServiceClient::new(channel);

        let (raw, outbound_rx) = RawConnection::new(self.network_id.clone(), peer_node_id.to_string(), Initiator::Local);
        let local_nonce = uuid::Uuid::new_v4().to_string();
        let init = proto::Packet {
            kind: Some(proto::packet::Kind::ConnectionInit(proto::ConnectionInit {
                node_id: self.store.node_id().clone(),
                network_id: self.network_id.clone(),
                nonce: local_nonce.clone(),
            })),
        };
        if !raw.send(init) {
            return Err(crate::error::TransportError::NoAddress(peer_node_id.to_string()));
        }

        let outbound_stream = UnboundedReceiverStream::new(outbound_rx);
        let mut response_stream = client.stream_updates(Request::new(outbound_stream)).await?.into_inner();

        let first = match response_stream.message().await {
            Ok(Some(packet)) => packet,
            _ => {
                raw.close();
                return Err(crate::error::TransportError::InvalidInitialPacket);
            }
        };
        let Some(proto::packet::Kind::ConnectionAck(ack)) = first.kind else {
            raw.close();
            return Err(crate::error::TransportError::InvalidInitialPacket);
        };

        let connection = self.manager.get_or_insert(peer_node_id.to_string(), self.network_id.clone());
        connection.add_raw_connection(raw.clone());
        let validator = Arc::new(ConnectionValidator::new(
            local_nonce,
            ack.nonce,
            self.network_id.clone(),
            self.store.node_id().clone(),
            peer_node_id.to_string(),
        ));
        connection.set_validator(validator.clone());

        let session = PeerSession {
            store: self.store.clone(),
            incoming: self.incoming.clone(),
            heartbeats: self.heartbeats.clone(),
            verifier,
            validator,
            raw,
            connection,
        };
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            session.drive(response_stream).await;
            dispatch.trigger_event("instant_update");
        });
        Ok(())
    }
}
