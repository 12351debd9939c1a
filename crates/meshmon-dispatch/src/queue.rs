use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::Notify;

/// A set-backed pending-work queue: repeated identical paths/events collapse
/// into one entry, and a waiter can asynchronously block until something is
/// added (spec §4.3).
#[derive(Default)]
pub struct DedupeQueue {
    items: Mutex<BTreeSet<String>>,
    notify: Notify,
}

impl DedupeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, items: impl IntoIterator<Item = String>) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.items.lock().unwrap();
        guard.extend(items);
        if !guard.is_empty() {
            self.notify.notify_waiters();
        }
    }

    pub fn pop_all(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.items.lock().unwrap();
        std::mem::take(&mut *guard).into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        self.items.lock().unwrap().is_empty()
    }

    /// Resolves immediately if items are already pending; otherwise waits
    /// for the next `add`. Also resolves on `wake`, used to unblock this
    /// during shutdown.
    pub async fn wait_for_items(&self) {
        loop {
            // Capture the notification future before checking emptiness: if
            // `add` runs between the check and the await, `notify_waiters`
            // would otherwise wake no one and this would stall forever.
            let notified = self.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
            if !self.is_empty() {
                return;
            }
        }
    }

    /// Wakes every current waiter without adding anything — used by the
    /// owning manager to unblock `wait_for_items` during shutdown.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_deduplicates_repeated_paths() {
        let queue = DedupeQueue::new();
        queue.add(["a".to_string(), "a".to_string(), "b".to_string()]);
        let mut popped = queue.pop_all();
        popped.sort();
        assert_eq!(popped, vec!["a".to_string(), "b".to_string()]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn wait_for_items_resolves_once_something_is_added() {
        let queue = std::sync::Arc::new(DedupeQueue::new());
        let waiter = queue.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_items().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.add(["x".to_string()]);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("did not time out")
            .expect("task did not panic");
    }
}
