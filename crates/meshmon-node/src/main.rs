#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use meshmon_config::{Config, ConfigBus, NetworkConfig, NodeConfigEntry};
use meshmon_crypto::{key_files, KeyMapping};
use meshmon_dispatch::{PathMatcher, RateLimitedHandler, UpdateManager};
use meshmon_election::LeaderElectionHandler;
use meshmon_pulse::{ClockPulseGenerator, ClockTableHandler, NodeStatusHandler, PulseTableHandler};
use meshmon_store::SharedStore;
use meshmon_transport::proto::mesh_mon_service_server::MeshMonServiceServer;
use meshmon_transport::{ConnectionManager, Dialler, HeartbeatController, IncomingUpdateHandler, MeshMonServer, OutgoingUpdateHandler};

const HEARTBEAT_TICK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
struct NodeOpts {
    /// Path to the TOML config file (spec §6).
    #[clap(long)]
    config: PathBuf,
    /// Directory holding this node's private key and every known peer's
    /// public key, named `<node_id>.key` / `<node_id>.pub` (spec §6).
    #[clap(long)]
    key_dir: PathBuf,
    #[clap(long, env = "MESHMON_TELEMETRY_ADDR", default_value = "127.0.0.1:9618")]
    telemetry_addr: SocketAddr,
}

/// Loads this node's signer and every configured peer's verifier for one
/// network, generating this node's own keypair on first run.
fn build_key_mapping(key_dir: &Path, network: &NetworkConfig) -> Result<KeyMapping> {
    let signer = key_files::generate_and_save(key_dir, &network.node_id)
        .with_context(|| format!("loading/generating signing key for {}", network.node_id))?;
    let mut key_mapping = KeyMapping::new(signer);
    for peer in &network.node_config {
        if peer.node_id == network.node_id {
            continue;
        }
        let verifier = key_files::load_verifier(key_dir, &peer.node_id)
            .with_context(|| format!("loading verifying key for peer {}", peer.node_id))?;
        key_mapping.add_verifier(verifier);
    }
    Ok(key_mapping)
}

/// Wires and runs every component for one network (spec §4): the store, the
/// dispatch engine, the pulse/clock/node-status/leader handlers, and the
/// gRPC transport (server + dialler + heartbeats). Runs until cancelled.
async fn run_network(
    network: NetworkConfig,
    key_dir: PathBuf,
    config_bus: Arc<ConfigBus>,
    cancellation: CancellationToken,
) -> Result<()> {
    let network_id = network.network_id.clone();
    tracing::info!(network_id = %network_id, node_id = %network.node_id, "starting network");

    let key_mapping = build_key_mapping(&key_dir, &network)?;
    let store = Arc::new(SharedStore::new(key_mapping));
    let peer_ids: Vec<String> = network
        .node_config
        .iter()
        .map(|p| p.node_id.clone())
        .filter(|id| *id != network.node_id)
        .collect();
    store.ensure_consistency(peer_ids);

    let cluster_secrets: BTreeMap<String, String> = network
        .consistent_clusters
        .iter()
        .map(|c| (c.name.clone(), c.secret.clone()))
        .collect();

    let manager = UpdateManager::new();
    manager.add_handler(PulseTableHandler::new(store.clone(), manager.clone()));
    manager.add_handler(ClockTableHandler::new(
        store.clone(),
        manager.clone(),
        network.cluster.clock_pulse_interval,
        network_id.clone(),
    ));
    manager.add_handler(NodeStatusHandler::new(
        store.clone(),
        manager.clone(),
        network.cluster.clock_pulse_interval,
        network_id.clone(),
    ));
    for consistent_cluster in &network.consistent_clusters {
        manager.add_handler(LeaderElectionHandler::new(
            store.clone(),
            manager.clone(),
            consistent_cluster.name.clone(),
            consistent_cluster.secret.clone(),
            network_id.clone(),
        ));
    }

    let connections = ConnectionManager::new();
    let incoming = IncomingUpdateHandler::new(store.clone(), manager.clone(), cluster_secrets);
    let outgoing = OutgoingUpdateHandler::new(store.clone(), connections.clone(), network_id.clone());

    let rate_limit_watcher = config_bus
        .get_watcher({
            let network_id = network_id.clone();
            move |config: Option<&Config>| {
                config?
                    .networks
                    .get(&network_id)
                    .map(|n| Duration::from_millis(n.cluster.update_rate_limit_ms))
            }
        })
        .context("network missing from config bus at startup")?;
    let rate_limited_outgoing = RateLimitedHandler::new(
        outgoing.clone(),
        PathMatcher::Any(vec![PathMatcher::exact("update"), PathMatcher::exact("instant_update")]),
        &rate_limit_watcher,
    );
    manager.add_event_handler(rate_limited_outgoing);
    manager.start();

    let heartbeats = HeartbeatController::new(store.clone(), connections.clone(), network_id.clone());

    let pulse_interval = Duration::from_secs_f64(network.cluster.clock_pulse_interval.max(0.01));
    ClockPulseGenerator::new(store.clone(), manager.clone(), pulse_interval, cancellation.clone()).spawn();

    let node_config_watcher = config_bus
        .get_watcher({
            let network_id = network_id.clone();
            move |config: Option<&Config>| config?.networks.get(&network_id).map(|n| n.node_config.clone())
        })
        .context("network missing from config bus at startup")?;

    let dialler = Dialler::new(
        store.clone(),
        connections.clone(),
        manager.clone(),
        heartbeats.clone(),
        incoming.clone(),
        outgoing.clone(),
        network_id.clone(),
    );
    let dialler_watcher = node_config_watcher.clone();
    let dialler_task = dialler.spawn(move || dialler_watcher.current());

    let heartbeat_watcher = node_config_watcher.clone();
    let heartbeat_network = network.clone();
    let heartbeat_cancellation = cancellation.clone();
    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = heartbeat_cancellation.cancelled() => return,
                _ = tokio::time::sleep(HEARTBEAT_TICK_INTERVAL) => {}
            }
            let peers: Vec<(String, NetworkConfig)> = heartbeat_watcher
                .current()
                .into_iter()
                .map(|p: NodeConfigEntry| {
                    let mut net = heartbeat_network.clone();
                    net.node_config = vec![p.clone()];
                    (p.node_id, net)
                })
                .collect();
            heartbeats.tick(&peers);
        }
    });

    let listen_addr: SocketAddr = network
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr {:?} for network {network_id}", network.listen_addr))?;
    let server = MeshMonServer::new(store.clone(), connections.clone(), manager.clone(), heartbeats.clone(), incoming.clone(), network_id.clone());
    let server_task = tokio::spawn(async move {
        tracing::info!(network_id = %network_id, addr = %listen_addr, "gRPC transport listening");
        if let Err(e) = Server::builder()
            .add_service(MeshMonServiceServer::new(server))
            .serve(listen_addr)
            .await
        {
            tracing::error!(network_id = %network_id, error = %e, "gRPC server exited");
        }
    });

    cancellation.cancelled().await;
    dialler_task.abort();
    heartbeat_task.abort();
    server_task.abort();
    manager.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    meshmon_telemetry::init::init_tracing()?;
    let sink = meshmon_telemetry::prometheus_sink::install().context("installing metrics sink")?;
    let _ = meshmon_telemetry::sinks::SINK.set(sink);

    let opts = NodeOpts::parse();
    tokio::spawn(meshmon_telemetry::http::run_server(opts.telemetry_addr));

    let config = Config::load_from_path(&opts.config).context("loading config")?;
    let config_bus = Arc::new(ConfigBus::new(Some(config.clone())));
    let cancellation = CancellationToken::new();

    let mut network_tasks = Vec::new();
    for network in config.networks.values() {
        let network = network.clone();
        let key_dir = opts.key_dir.clone();
        let config_bus = config_bus.clone();
        let cancellation = cancellation.clone();
        network_tasks.push(tokio::spawn(async move {
            if let Err(e) = run_network(network, key_dir, config_bus, cancellation).await {
                tracing::error!(error = %e, "network task exited with an error");
            }
        }));
    }

    tokio::signal::ctrl_c().await.context("installing ctrl-c handler")?;
    tracing::info!("shutdown requested");
    cancellation.cancel();
    for task in network_tasks {
        let _ = task.await;
    }
    Ok(())
}
