use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};

use meshmon_dispatch::UpdateManager;
use meshmon_store::SharedStore;

use crate::connection::{ConnectionManager, Initiator, RawConnection};
use crate::heartbeat::HeartbeatController;
use crate::proto::{self, mesh_mon_service_server::MeshMonService as MeshMonServiceTrait};
use crate::router::PeerSession;
use crate::update::IncomingUpdateHandler;
use crate::validator::ConnectionValidator;

pub type PacketStream = Pin<Box<dyn Stream<Item = Result<proto::Packet, Status>> + Send>>;

/// The gRPC service implementation (spec §4.6's server acceptor). The first
/// packet on every stream must be `ConnectionInit`; anything else gets an
/// `INVALID_INITIAL_PACKET` error and the stream is closed.
pub struct MeshMonServer {
    store: Arc<SharedStore>,
    manager: Arc<ConnectionManager>,
    dispatch: Arc<UpdateManager>,
    heartbeats: Arc<HeartbeatController>,
    incoming: Arc<IncomingUpdateHandler>,
    network_id: String,
}

impl MeshMonServer {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<ConnectionManager>,
        dispatch: Arc<UpdateManager>,
        heartbeats: Arc<HeartbeatController>,
        incoming: Arc<IncomingUpdateHandler>,
        network_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            manager,
            dispatch,
            heartbeats,
            incoming,
            network_id: network_id.into(),
        }
    }
}

#[tonic::async_trait]
impl MeshMonServiceTrait for MeshMonServer {
    type StreamUpdatesStream = PacketStream;

    async fn stream_updates(
        &self,
        request: Request<Streaming<proto::Packet>>,
    ) -> Result<Response<Self::StreamUpdatesStream>, Status> {
        let mut inbound = request.into_inner();
        let Some(first) = inbound.message().await? else {
            return Err(Status::invalid_argument("empty stream"));
        };
        let Some(proto::packet::Kind::ConnectionInit(init)) = first.kind else {
            return Err(Status::invalid_argument("first packet must be connection_init"));
        };
        if init.network_id != self.network_id {
            return Err(Status::invalid_argument("network_id mismatch"));
        }
        let peer_node_id = init.node_id;
        let Some(verifier) = self.store.key_mapping().get_verifier(&peer_node_id).cloned() else {
            return Err(Status::permission_denied("unknown peer node_id"));
        };

        let (raw, outbound_rx) = RawConnection::new(self.network_id.clone(), peer_node_id.clone(), Initiator::Remote);
        let connection = self.manager.get_or_insert(peer_node_id.clone(), self.network_id.clone());
        connection.add_raw_connection(raw.clone());

        let local_nonce = uuid::Uuid::new_v4().to_string();
        let validator = Arc::new(ConnectionValidator::new(
            local_nonce.clone(),
            init.nonce,
            self.network_id.clone(),
            self.store.node_id().clone(),
            peer_node_id.clone(),
        ));
        connection.set_validator(validator.clone());

        let ack = proto::Packet {
            kind: Some(proto::packet::Kind::ConnectionAck(proto::ConnectionAck {
                message: "connection established".into(),
                nonce: local_nonce,
            })),
        };
        if !raw.send(ack) {
            return Err(Status::internal("failed to queue connection_ack"));
        }

        let session = PeerSession {
            store: self.store.clone(),
            incoming: self.incoming.clone(),
            heartbeats: self.heartbeats.clone(),
            verifier,
            validator,
            raw: raw.clone(),
            connection: connection.clone(),
        };
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            session.drive(inbound).await;
            dispatch.trigger_event("instant_update");
        });

        let stream = UnboundedReceiverStream::new(outbound_rx).map(Ok);
        Ok(Response::new(Box::pin(stream)))
    }
}
