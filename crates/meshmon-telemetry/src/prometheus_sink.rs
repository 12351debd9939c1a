//! Concrete metrics sink implementation backed by the `prometheus` crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    GaugeVec, HistogramVec, IntCounterVec,
};

static PACKETS_SENT_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static PACKETS_RECEIVED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static PACKET_PROCESSING_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static CONNECTIONS_ESTABLISHED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static CONNECTIONS_CLOSED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static CONNECTION_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static CONNECTION_FAILURES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static QUEUE_DEPTH: OnceCell<GaugeVec> = OnceCell::new();

static CLOCK_RTT_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static CLOCK_DELTA_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static PEER_ONLINE: OnceCell<GaugeVec> = OnceCell::new();

static LEADER_CHANGES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static IS_LEADER: OnceCell<GaugeVec> = OnceCell::new();

static BATCH_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static HANDLER_INVOCATIONS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static QUEUE_LEN: OnceCell<GaugeVec> = OnceCell::new();

static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("prometheus sink not initialized, call install() first")
    };
}

impl TransportMetricsSink for PrometheusSink {
    fn inc_packet_sent(&self, network_id: &str, dest_node_id: &str, packet_kind: &str, bytes: u64) {
        get_metric!(PACKETS_SENT_TOTAL)
            .with_label_values(&[network_id, dest_node_id, packet_kind])
            .inc_by(1);
        let _ = bytes;
    }
    fn inc_packet_received(
        &self,
        network_id: &str,
        src_node_id: &str,
        packet_kind: &str,
        bytes: u64,
    ) {
        get_metric!(PACKETS_RECEIVED_TOTAL)
            .with_label_values(&[network_id, src_node_id, packet_kind])
            .inc_by(1);
        let _ = bytes;
    }
    fn observe_packet_processing(&self, network_id: &str, packet_kind: &str, duration_secs: f64) {
        get_metric!(PACKET_PROCESSING_SECONDS)
            .with_label_values(&[network_id, packet_kind])
            .observe(duration_secs);
    }
    fn inc_connection_established(&self, network_id: &str, node_id: &str, initiator: &str) {
        get_metric!(CONNECTIONS_ESTABLISHED_TOTAL)
            .with_label_values(&[network_id, node_id, initiator])
            .inc();
    }
    fn inc_connection_closed(
        &self,
        network_id: &str,
        node_id: &str,
        initiator: &str,
        duration_secs: f64,
    ) {
        get_metric!(CONNECTIONS_CLOSED_TOTAL)
            .with_label_values(&[network_id, node_id, initiator])
            .inc();
        get_metric!(CONNECTION_DURATION_SECONDS)
            .with_label_values(&[network_id, node_id])
            .observe(duration_secs);
    }
    fn inc_connection_failure(&self, network_id: &str, node_id: &str, reason: &'static str) {
        get_metric!(CONNECTION_FAILURES_TOTAL)
            .with_label_values(&[network_id, node_id, reason])
            .inc();
    }
    fn set_queue_depth(&self, network_id: &str, node_id: &str, direction: &'static str, depth: i64) {
        get_metric!(QUEUE_DEPTH)
            .with_label_values(&[network_id, node_id, direction])
            .set(depth as f64);
    }
}

impl ClockMetricsSink for PrometheusSink {
    fn observe_rtt(&self, network_id: &str, peer: &str, rtt_secs: f64) {
        get_metric!(CLOCK_RTT_SECONDS)
            .with_label_values(&[network_id, peer])
            .observe(rtt_secs);
    }
    fn observe_delta(&self, network_id: &str, peer: &str, delta_secs: f64) {
        get_metric!(CLOCK_DELTA_SECONDS)
            .with_label_values(&[network_id, peer])
            .observe(delta_secs);
    }
    fn set_peer_online(&self, network_id: &str, peer: &str, online: bool) {
        get_metric!(PEER_ONLINE)
            .with_label_values(&[network_id, peer])
            .set(if online { 1.0 } else { 0.0 });
    }
}

impl ElectionMetricsSink for PrometheusSink {
    fn inc_leader_change(&self, network_id: &str, cluster_name: &str) {
        get_metric!(LEADER_CHANGES_TOTAL)
            .with_label_values(&[network_id, cluster_name])
            .inc();
    }
    fn set_is_leader(&self, network_id: &str, cluster_name: &str, is_leader: bool) {
        get_metric!(IS_LEADER)
            .with_label_values(&[network_id, cluster_name])
            .set(if is_leader { 1.0 } else { 0.0 });
    }
}

impl DispatchMetricsSink for PrometheusSink {
    fn observe_batch_duration(&self, queue: &'static str, duration_secs: f64) {
        get_metric!(BATCH_DURATION_SECONDS)
            .with_label_values(&[queue])
            .observe(duration_secs);
    }
    fn inc_handler_invocation(&self, handler: &str) {
        get_metric!(HANDLER_INVOCATIONS_TOTAL)
            .with_label_values(&[handler])
            .inc();
    }
    fn set_queue_len(&self, queue: &'static str, len: i64) {
        get_metric!(QUEUE_LEN).with_label_values(&[queue]).set(len as f64);
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, variant: &'static str) {
        get_metric!(ERRORS_TOTAL).with_label_values(&[kind, variant]).inc();
    }
}

/// Registers every collector. Must be called exactly once at startup.
#[allow(clippy::expect_used)]
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    PACKETS_SENT_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_transport_packets_sent_total",
            "Total packets sent on the transport.",
            &["network_id", "dest_node_id", "packet_kind"]
        )?)
        .expect("static already initialized");
    PACKETS_RECEIVED_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_transport_packets_received_total",
            "Total packets received on the transport.",
            &["network_id", "src_node_id", "packet_kind"]
        )?)
        .expect("static already initialized");
    PACKET_PROCESSING_SECONDS
        .set(register_histogram_vec!(
            "meshmon_transport_packet_processing_seconds",
            "Time spent processing an inbound packet.",
            &["network_id", "packet_kind"],
            exponential_buckets(0.0001, 2.0, 14)?
        )?)
        .expect("static already initialized");
    CONNECTIONS_ESTABLISHED_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_transport_connections_established_total",
            "Total raw connections established.",
            &["network_id", "node_id", "initiator"]
        )?)
        .expect("static already initialized");
    CONNECTIONS_CLOSED_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_transport_connections_closed_total",
            "Total raw connections closed.",
            &["network_id", "node_id", "initiator"]
        )?)
        .expect("static already initialized");
    CONNECTION_DURATION_SECONDS
        .set(register_histogram_vec!(
            "meshmon_transport_connection_duration_seconds",
            "Lifetime of a closed raw connection.",
            &["network_id", "node_id"],
            exponential_buckets(1.0, 2.0, 16)?
        )?)
        .expect("static already initialized");
    CONNECTION_FAILURES_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_transport_connection_failures_total",
            "Total connection failures, by reason.",
            &["network_id", "node_id", "reason"]
        )?)
        .expect("static already initialized");
    QUEUE_DEPTH
        .set(register_gauge_vec!(
            "meshmon_transport_queue_depth",
            "Current depth of a raw connection's in/out packet queue.",
            &["network_id", "node_id", "direction"]
        )?)
        .expect("static already initialized");
    CLOCK_RTT_SECONDS
        .set(register_histogram_vec!(
            "meshmon_clock_rtt_seconds",
            "Observed round-trip time to a peer.",
            &["network_id", "peer"],
            exponential_buckets(0.001, 2.0, 16)?
        )?)
        .expect("static already initialized");
    CLOCK_DELTA_SECONDS
        .set(register_histogram_vec!(
            "meshmon_clock_delta_seconds",
            "Observed clock offset to a peer.",
            &["network_id", "peer"],
            exponential_buckets(0.001, 2.0, 16)?
        )?)
        .expect("static already initialized");
    PEER_ONLINE
        .set(register_gauge_vec!(
            "meshmon_clock_peer_online",
            "1 if the peer is currently considered ONLINE, else 0.",
            &["network_id", "peer"]
        )?)
        .expect("static already initialized");
    LEADER_CHANGES_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_election_leader_changes_total",
            "Total leader transitions observed by this node.",
            &["network_id", "cluster_name"]
        )?)
        .expect("static already initialized");
    IS_LEADER
        .set(register_gauge_vec!(
            "meshmon_election_is_leader",
            "1 if this node currently believes itself LEADER.",
            &["network_id", "cluster_name"]
        )?)
        .expect("static already initialized");
    BATCH_DURATION_SECONDS
        .set(register_histogram_vec!(
            "meshmon_dispatch_batch_duration_seconds",
            "Time spent processing one dispatch batch.",
            &["queue"],
            exponential_buckets(0.0001, 2.0, 16)?
        )?)
        .expect("static already initialized");
    HANDLER_INVOCATIONS_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_dispatch_handler_invocations_total",
            "Total handler invocations, by handler name.",
            &["handler"]
        )?)
        .expect("static already initialized");
    QUEUE_LEN
        .set(register_gauge_vec!(
            "meshmon_dispatch_queue_len",
            "Current length of a dispatch queue.",
            &["queue"]
        )?)
        .expect("static already initialized");
    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "meshmon_errors_total",
            "Total errors, categorized by kind and variant.",
            &["kind", "variant"]
        )?)
        .expect("static already initialized");

    static SINK: PrometheusSink = PrometheusSink;
    Ok(&SINK)
}
