//! Abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

/// A no-op sink for tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// Lazily-initialized static reference to the installed `MetricsSink`.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns the configured sink, or a no-op sink if none was installed.
pub fn metrics() -> &'static dyn MetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Metrics for the transport layer (C7): packets, connections, queue depth.
pub trait TransportMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_packet_sent(&self, network_id: &str, dest_node_id: &str, packet_kind: &str, bytes: u64);
    fn inc_packet_received(
        &self,
        network_id: &str,
        src_node_id: &str,
        packet_kind: &str,
        bytes: u64,
    );
    fn observe_packet_processing(&self, network_id: &str, packet_kind: &str, duration_secs: f64);
    fn inc_connection_established(&self, network_id: &str, node_id: &str, initiator: &str);
    fn inc_connection_closed(
        &self,
        network_id: &str,
        node_id: &str,
        initiator: &str,
        duration_secs: f64,
    );
    fn inc_connection_failure(&self, network_id: &str, node_id: &str, reason: &'static str);
    fn set_queue_depth(&self, network_id: &str, node_id: &str, direction: &'static str, depth: i64);
}
impl TransportMetricsSink for NopSink {
    fn inc_packet_sent(&self, _: &str, _: &str, _: &str, _: u64) {}
    fn inc_packet_received(&self, _: &str, _: &str, _: &str, _: u64) {}
    fn observe_packet_processing(&self, _: &str, _: &str, _: f64) {}
    fn inc_connection_established(&self, _: &str, _: &str, _: &str) {}
    fn inc_connection_closed(&self, _: &str, _: &str, _: &str, _: f64) {}
    fn inc_connection_failure(&self, _: &str, _: &str, _: &'static str) {}
    fn set_queue_depth(&self, _: &str, _: &str, _: &'static str, _: i64) {}
}

/// Metrics for the clock-synchronisation layer (C5).
pub trait ClockMetricsSink: Send + Sync + std::fmt::Debug {
    fn observe_rtt(&self, network_id: &str, peer: &str, rtt_secs: f64);
    fn observe_delta(&self, network_id: &str, peer: &str, delta_secs: f64);
    fn set_peer_online(&self, network_id: &str, peer: &str, online: bool);
}
impl ClockMetricsSink for NopSink {
    fn observe_rtt(&self, _: &str, _: &str, _: f64) {}
    fn observe_delta(&self, _: &str, _: &str, _: f64) {}
    fn set_peer_online(&self, _: &str, _: &str, _: bool) {}
}

/// Metrics for the leader-election layer (C6).
pub trait ElectionMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_leader_change(&self, network_id: &str, cluster_name: &str);
    fn set_is_leader(&self, network_id: &str, cluster_name: &str, is_leader: bool);
}
impl ElectionMetricsSink for NopSink {
    fn inc_leader_change(&self, _: &str, _: &str) {}
    fn set_is_leader(&self, _: &str, _: &str, _: bool) {}
}

/// Metrics for the update/event dispatch engine (C4).
pub trait DispatchMetricsSink: Send + Sync + std::fmt::Debug {
    fn observe_batch_duration(&self, queue: &'static str, duration_secs: f64);
    fn inc_handler_invocation(&self, handler: &str);
    fn set_queue_len(&self, queue: &'static str, len: i64);
}
impl DispatchMetricsSink for NopSink {
    fn observe_batch_duration(&self, _: &'static str, _: f64) {}
    fn inc_handler_invocation(&self, _: &str) {}
    fn set_queue_len(&self, _: &'static str, _: i64) {}
}

/// Generic error metrics, categorized by kind and variant.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_error(&self, kind: &'static str, variant: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _: &'static str, _: &'static str) {}
}

/// Unifying sink implemented by every concrete metrics backend.
pub trait MetricsSink:
    TransportMetricsSink + ClockMetricsSink + ElectionMetricsSink + DispatchMetricsSink + ErrorMetricsSink
{
}

impl<T> MetricsSink for T where
    T: TransportMetricsSink
        + ClockMetricsSink
        + ElectionMetricsSink
        + DispatchMetricsSink
        + ErrorMetricsSink
{
}
