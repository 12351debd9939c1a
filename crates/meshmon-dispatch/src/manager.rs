use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::UpdateController;
use crate::handler::UpdateHandler;
use crate::queue::DedupeQueue;

/// Runs two independent worker loops — one draining changed-path batches
/// into registered update handlers, one draining out-of-band events into
/// registered event handlers — and exposes `trigger_update`/`trigger_event`
/// as the single entry point the rest of the node uses to wake them (spec
/// §4.3). Event handlers only run once the update queue has gone idle, so an
/// event handler inspecting the store always sees a settled state.
pub struct UpdateManager {
    update_queue: DedupeQueue,
    update_controller: UpdateController,
    event_queue: DedupeQueue,
    event_controller: UpdateController,
    idle: AtomicBool,
    idle_notify: Notify,
    cancellation: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UpdateManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            update_queue: DedupeQueue::new(),
            update_controller: UpdateController::new(),
            event_queue: DedupeQueue::new(),
            event_controller: UpdateController::new(),
            idle: AtomicBool::new(true),
            idle_notify: Notify::new(),
            cancellation: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn add_handler(&self, handler: Arc<dyn UpdateHandler>) {
        self.update_controller.add(handler);
    }

    pub fn add_event_handler(&self, handler: Arc<dyn UpdateHandler>) {
        self.event_controller.add(handler);
    }

    /// Wakes the update loop with freshly changed paths and marks the
    /// manager non-idle, holding off event dispatch until it drains.
    pub fn trigger_update(&self, paths: impl IntoIterator<Item = String>) {
        self.idle.store(false, Ordering::SeqCst);
        self.update_queue.add(paths);
    }

    pub fn trigger_event(&self, event: impl Into<String>) {
        self.event_queue.add([event.into()]);
    }

    pub fn wait_until_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    pub fn start(self: &Arc<Self>) {
        let update_mgr = self.clone();
        let update_task = tokio::spawn(async move { update_mgr.update_loop().await });
        let event_mgr = self.clone();
        let event_task = tokio::spawn(async move { event_mgr.event_loop().await });
        #[allow(clippy::unwrap_used)]
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(update_task);
            tasks.push(event_task);
        }
    }

    async fn update_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = self.update_queue.wait_for_items() => {}
            }
            if self.cancellation.is_cancelled() {
                return;
            }
            let _timer = meshmon_telemetry::Timer::new(meshmon_telemetry::metrics(), "update");
            loop {
                let paths = self.update_queue.pop_all();
                if paths.is_empty() {
                    break;
                }
                meshmon_telemetry::metrics().set_queue_len("update", paths.len() as i64);
                self.update_controller.handle(&paths);
                if self.update_queue.is_empty() {
                    break;
                }
            }
            self.idle.store(true, Ordering::SeqCst);
            self.idle_notify.notify_waiters();
        }
    }

    async fn event_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = self.event_queue.wait_for_items() => {}
            }
            while !self.idle.load(Ordering::SeqCst) {
                let notified = self.idle_notify.notified();
                if self.idle.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = self.cancellation.cancelled() => return,
                    _ = notified => {}
                }
            }
            if self.cancellation.is_cancelled() {
                return;
            }
            let events = self.event_queue.pop_all();
            if !events.is_empty() {
                let _timer = meshmon_telemetry::Timer::new(meshmon_telemetry::metrics(), "event");
                self.event_controller.handle(&events);
            }
        }
    }

    /// Cancels both worker loops, wakes anything still blocked in
    /// `wait_for_items`, joins the tasks, then runs every handler's `stop`.
    pub async fn stop(&self) {
        tracing::info!("stopping update manager");
        self.cancellation.cancel();
        self.update_queue.wake();
        self.event_queue.wake();
        self.idle_notify.notify_waiters();

        let tasks: Vec<JoinHandle<()>> = {
            #[allow(clippy::unwrap_used)]
            let mut guard = self.tasks.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            let _ = task.await;
        }
        self.update_controller.stop();
        self.event_controller.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::PathMatcher;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        matcher: PathMatcher,
        calls: Arc<AtomicUsize>,
    }

    impl UpdateHandler for CountingHandler {
        fn matcher(&self) -> &PathMatcher {
            &self.matcher
        }
        fn handle_update(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn trigger_update_drives_registered_handler() {
        let manager = UpdateManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        manager.add_handler(Arc::new(CountingHandler {
            matcher: PathMatcher::exact("nodes.a.values.k"),
            calls: calls.clone(),
        }));
        manager.start();

        manager.trigger_update(["nodes.a.values.k".to_string()]);

        let mut waited = 0;
        while calls.load(Ordering::SeqCst) == 0 && waited < 200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        manager.stop().await;
    }
}
