use std::sync::Arc;

use tonic::Streaming;

use meshmon_crypto::Verifier;
use meshmon_store::SharedStore;

use crate::connection::{Connection, RawConnection};
use crate::heartbeat::HeartbeatController;
use crate::proto;
use crate::update::IncomingUpdateHandler;
use crate::validator::{self, ConnectionValidator};

fn packet_kind_label(packet: &proto::Packet) -> &'static str {
    match &packet.kind {
        Some(proto::packet::Kind::ConnectionInit(_)) => "connection_init",
        Some(proto::packet::Kind::ConnectionAck(_)) => "connection_ack",
        Some(proto::packet::Kind::Heartbeat(_)) => "heartbeat",
        Some(proto::packet::Kind::HeartbeatResponse(_)) => "heartbeat_response",
        Some(proto::packet::Kind::StoreUpdate(_)) => "store_update",
        Some(proto::packet::Kind::Error(_)) => "error",
        None => "empty",
    }
}

/// One established peer session: everything needed to process packets
/// arriving after the `ConnectionInit`/`ConnectionAck` handshake has
/// completed (spec §4.6). Shared between the server acceptor and the client
/// dialler, since the post-handshake behavior is identical either way.
pub struct PeerSession {
    pub store: Arc<SharedStore>,
    pub incoming: Arc<IncomingUpdateHandler>,
    pub heartbeats: Arc<HeartbeatController>,
    pub verifier: Verifier,
    pub validator: Arc<ConnectionValidator>,
    pub raw: Arc<RawConnection>,
    pub connection: Arc<Connection>,
}

impl PeerSession {
    /// Drains `inbound` until the stream ends or the connection closes,
    /// dispatching each packet, then tears down the `RawConnection`.
    pub async fn drive(self, mut inbound: Streaming<proto::Packet>) {
        loop {
            let next = inbound.message().await;
            let packet = match next {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, peer = %self.raw.dest_node_id, "inbound stream error");
                    break;
                }
            };
            if self.raw.is_closed() {
                break;
            }
            let start = std::time::Instant::now();
            let kind = packet_kind_label(&packet);
            let bytes = prost::Message::encoded_len(&packet) as u64;
            meshmon_telemetry::metrics().inc_packet_received(&self.raw.network_id, &self.raw.dest_node_id, kind, bytes);
            self.handle(packet).await;
            meshmon_telemetry::metrics().observe_packet_processing(&self.raw.network_id, kind, start.elapsed().as_secs_f64());
        }
        self.connection.remove_raw_connection(&self.raw);
    }

    async fn handle(&self, packet: proto::Packet) {
        match packet.kind {
            Some(proto::packet::Kind::Heartbeat(hb)) => self.handle_heartbeat(hb),
            Some(proto::packet::Kind::HeartbeatResponse(hr)) => self.handle_heartbeat_response(hr),
            Some(proto::packet::Kind::StoreUpdate(su)) => self.handle_store_update(su),
            Some(proto::packet::Kind::Error(e)) => {
                tracing::warn!(peer = %self.raw.dest_node_id, code = %e.code, message = %e.message, "peer reported an error, closing");
                self.raw.close();
            }
            Some(proto::packet::Kind::ConnectionInit(_)) | Some(proto::packet::Kind::ConnectionAck(_)) => {
                tracing::debug!(peer = %self.raw.dest_node_id, "ignoring handshake packet after handshake completed");
            }
            None => {}
        }
    }

    fn accept_validator(&self, raw: &str) -> Option<()> {
        let block = validator::decode(raw).ok()?;
        self.validator.accept(&self.verifier, &block).ok()
    }

    fn handle_heartbeat(&self, hb: proto::Heartbeat) {
        if self.accept_validator(&hb.validator).is_none() {
            tracing::warn!(peer = %self.raw.dest_node_id, "rejected heartbeat with invalid validator");
            return;
        }
        let signed = self.validator.sign(self.store.key_mapping().signer());
        let Ok(encoded) = validator::encode(&signed) else { return };
        let response = proto::Packet {
            kind: Some(proto::packet::Kind::HeartbeatResponse(proto::HeartbeatResponse {
                validator: encoded,
                node_time: hb.node_time,
            })),
        };
        let bytes = prost::Message::encoded_len(&response) as u64;
        if self.raw.send(response) {
            meshmon_telemetry::metrics().inc_packet_sent(&self.raw.network_id, &self.raw.dest_node_id, "heartbeat_response", bytes);
        }
    }

    fn handle_heartbeat_response(&self, hr: proto::HeartbeatResponse) {
        if self.accept_validator(&hr.validator).is_none() {
            tracing::warn!(peer = %self.raw.dest_node_id, "rejected heartbeat_response with invalid validator");
            return;
        }
        self.heartbeats.record_response(&self.raw.dest_node_id, hr.node_time);
    }

    fn handle_store_update(&self, su: proto::StoreUpdate) {
        if self.accept_validator(&su.validator).is_none() {
            tracing::warn!(peer = %self.raw.dest_node_id, "rejected store_update with invalid validator");
            return;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&su.data) else {
            tracing::warn!(peer = %self.raw.dest_node_id, "store_update payload was not valid JSON");
            return;
        };
        self.incoming.handle(value);
    }
}
