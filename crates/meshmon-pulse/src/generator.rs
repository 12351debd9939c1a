use std::sync::Arc;
use std::time::Duration;

use meshmon_dispatch::UpdateManager;
use meshmon_store::SharedStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Emits this node's `clock_pulse` every `T_pulse` (spec §4.4) — the sole
/// input every peer's pulse/clock-table handlers measure skew and RTT from.
pub struct ClockPulseGenerator {
    store: Arc<SharedStore>,
    manager: Arc<UpdateManager>,
    interval: Duration,
    cancellation: CancellationToken,
}

impl ClockPulseGenerator {
    pub fn new(
        store: Arc<SharedStore>,
        manager: Arc<UpdateManager>,
        interval: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            store,
            manager,
            interval,
            cancellation,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let node_id = self.store.node_id().clone();
            let result = self
                .store
                .with_consistency_mut(|signer, consistency| consistency.emit_clock_pulse(signer));
            match result {
                Ok(()) => {
                    tracing::debug!("emitted clock pulse");
                    let path = format!("nodes.{node_id}.consistency.clock_pulse");
                    self.manager.trigger_update([path]);
                    self.manager.trigger_event("update");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot emit clock pulse: no consistency envelope");
                }
            }
        }
    }
}
