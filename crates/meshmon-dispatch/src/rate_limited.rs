use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshmon_config::ConfigWatcher;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handler::UpdateHandler;
use crate::matcher::PathMatcher;

/// Wraps another handler so it fires at most once per `min_interval`,
/// coalescing any updates that land inside the cooldown into the next run
/// (spec §4.6.1, a feature the distilled spec dropped but the original
/// update pipeline implements as `RateLimitedHandler`). `handle_update`
/// itself never blocks — it only flags a background task to run.
pub struct RateLimitedHandler {
    inner: Arc<dyn UpdateHandler>,
    min_interval_ms: Arc<AtomicU64>,
    trigger: Notify,
    cancellation: CancellationToken,
    matcher: PathMatcher,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimitedHandler {
    /// `matcher` is the pattern this wrapper itself registers under —
    /// typically the same pattern `inner` would have used, since the wrapper
    /// stands in for it in the controller's handler list.
    pub fn new(
        inner: Arc<dyn UpdateHandler>,
        matcher: PathMatcher,
        interval_watcher: &Arc<ConfigWatcher<Duration>>,
    ) -> Arc<Self> {
        let min_interval_ms = Arc::new(AtomicU64::new(
            interval_watcher.current().as_millis() as u64,
        ));

        let handler = Arc::new(Self {
            inner,
            min_interval_ms: min_interval_ms.clone(),
            trigger: Notify::new(),
            cancellation: CancellationToken::new(),
            matcher,
            task: Mutex::new(None),
        });

        interval_watcher.subscribe(move |interval: &Duration| {
            min_interval_ms.store(interval.as_millis() as u64, Ordering::SeqCst);
        });

        handler.spawn();
        handler
    }

    fn spawn(self: &Arc<Self>) {
        let runner = self.clone();
        let task = tokio::spawn(async move { runner.run_loop().await });
        #[allow(clippy::unwrap_used)]
        {
            *self.task.lock().unwrap() = Some(task);
        }
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = self.trigger.notified() => {
                    self.inner.handle_update();
                    let ms = self.min_interval_ms.load(Ordering::SeqCst);
                    if ms > 0 {
                        tokio::select! {
                            _ = self.cancellation.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        }
                    }
                }
            }
        }
    }
}

impl UpdateHandler for RateLimitedHandler {
    fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    fn handle_update(&self) {
        self.trigger.notify_one();
    }

    fn stop(&self) {
        self.cancellation.cancel();
        #[allow(clippy::unwrap_used)]
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.stop();
    }
}
