use std::sync::{Arc, Mutex, RwLock};

use crate::config::Config;

/// Derives a `T` from the current `Config`, or `None` when `T` is not (or no
/// longer) representable — e.g. the network this preprocessor cares about
/// was removed. A watcher whose preprocessor returns `None` unsubscribes
/// itself from the bus.
pub trait ConfigPreprocessor<T>: Send + Sync {
    fn preprocess(&self, config: Option<&Config>) -> Option<T>;
}

/// Wraps a plain closure as a `ConfigPreprocessor`.
impl<T, F> ConfigPreprocessor<T> for F
where
    F: Fn(Option<&Config>) -> Option<T> + Send + Sync,
{
    fn preprocess(&self, config: Option<&Config>) -> Option<T> {
        self(config)
    }
}

/// A derived, live-updating view of `T` over the `Config` stream. Holds the
/// latest successfully preprocessed value and notifies subscribers whenever
/// `ConfigBus::new_config` produces a new one.
pub struct ConfigWatcher<T> {
    current: RwLock<T>,
    preprocessor: Box<dyn ConfigPreprocessor<T>>,
    subscribers: Mutex<Vec<Box<dyn Fn(&T) + Send + Sync>>>,
}

impl<T: Clone> ConfigWatcher<T> {
    pub fn current(&self) -> T {
        #[allow(clippy::unwrap_used)]
        self.current.read().unwrap().clone()
    }

    /// Registers a callback run (with the lock released) every time the
    /// derived value changes.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        #[allow(clippy::unwrap_used)]
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }
}

/// Type-erased handle `ConfigBus` keeps so it can drive watchers over
/// distinct `T`s from one `Vec`.
trait ErasedWatcher: Send + Sync {
    /// Re-runs the preprocessor against `config`. Returns `false` when the
    /// watcher should be dropped from the bus.
    fn try_update(&self, config: &Config) -> bool;
}

impl<T: Clone + Send + Sync + 'static> ErasedWatcher for ConfigWatcher<T> {
    fn try_update(&self, config: &Config) -> bool {
        match self.preprocessor.preprocess(Some(config)) {
            Some(value) => {
                #[allow(clippy::unwrap_used)]
                {
                    *self.current.write().unwrap() = value.clone();
                }
                #[allow(clippy::unwrap_used)]
                for callback in self.subscribers.lock().unwrap().iter() {
                    callback(&value);
                }
                true
            }
            None => false,
        }
    }
}

/// The publish/subscribe hub every MeshMon component derives its live config
/// view from. `new_config` is the single entry point for a reload arriving
/// from whatever external loader owns it (file watch, Git poll, signal
/// handler — all out of scope here); every registered watcher is re-run in
/// registration order and watchers that can no longer derive their `T` are
/// quietly dropped.
pub struct ConfigBus {
    config: RwLock<Option<Config>>,
    watchers: Mutex<Vec<Arc<dyn ErasedWatcher>>>,
}

impl ConfigBus {
    pub fn new(initial: Option<Config>) -> Self {
        Self {
            config: RwLock::new(initial),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<Config> {
        #[allow(clippy::unwrap_used)]
        self.config.read().unwrap().clone()
    }

    /// Runs `preprocessor` once against the current config to build a new
    /// watcher. Returns `None` (and registers nothing) if `T` cannot be
    /// derived from the config as it stands today.
    pub fn get_watcher<T>(
        &self,
        preprocessor: impl ConfigPreprocessor<T> + 'static,
    ) -> Option<Arc<ConfigWatcher<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        #[allow(clippy::unwrap_used)]
        let config_guard = self.config.read().unwrap();
        let value = preprocessor.preprocess(config_guard.as_ref())?;
        drop(config_guard);

        let watcher = Arc::new(ConfigWatcher {
            current: RwLock::new(value),
            preprocessor: Box::new(preprocessor),
            subscribers: Mutex::new(Vec::new()),
        });
        #[allow(clippy::unwrap_used)]
        self.watchers.lock().unwrap().push(watcher.clone());
        Some(watcher)
    }

    /// Publishes a new config and drives every watcher. Watchers whose
    /// preprocessor returns `None` against the new config are unsubscribed.
    pub fn new_config(&self, config: Config) {
        #[allow(clippy::unwrap_used)]
        {
            *self.config.write().unwrap() = Some(config.clone());
        }
        #[allow(clippy::unwrap_used)]
        self.watchers.lock().unwrap().retain(|w| w.try_update(&config));
        tracing::info!("config bus applied new config");
    }
}

impl Default for ConfigBus {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::BTreeMap;

    fn sample_config(network_ids: &[&str]) -> Config {
        let mut networks = BTreeMap::new();
        for id in network_ids {
            networks.insert(
                id.to_string(),
                crate::config::NetworkConfig {
                    network_id: id.to_string(),
                    node_id: "n1".to_string(),
                    listen_addr: "127.0.0.1:0".to_string(),
                    node_config: Vec::new(),
                    monitors: Vec::new(),
                    cluster: Default::default(),
                    consistent_clusters: Vec::new(),
                },
            );
        }
        Config { networks }
    }

    #[test]
    fn watcher_tracks_named_network_and_unsubscribes_when_removed() {
        let bus = ConfigBus::new(Some(sample_config(&["alpha"])));
        let watcher = bus
            .get_watcher(move |config: Option<&Config>| {
                config?.networks.get("alpha").map(|n| n.node_id.clone())
            })
            .expect("alpha present at construction");
        assert_eq!(watcher.current(), "n1");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        watcher.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.new_config(sample_config(&["alpha", "beta"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.new_config(sample_config(&["beta"]));
        assert_eq!(
            bus.watchers.lock().expect("lock").len(),
            0,
            "watcher should have unsubscribed once alpha disappeared"
        );
    }

    #[test]
    fn get_watcher_returns_none_when_preprocessor_rejects_initial_config() {
        let bus = ConfigBus::new(Some(sample_config(&["alpha"])));
        let watcher = bus.get_watcher(|config: Option<&Config>| {
            config?.networks.get("missing").map(|n| n.node_id.clone())
        });
        assert!(watcher.is_none());
    }
}
