use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::handler::UpdateHandler;

/// Fans a batch of changed paths (or events) out to every registered handler
/// whose matcher claims at least one of them. A per-path cache of which
/// handlers matched avoids re-evaluating matchers for paths seen before
/// (invalidated whenever a handler is added); a handler that matches more
/// than one path in the same batch is still invoked exactly once.
pub struct UpdateController {
    handlers: Mutex<Vec<Arc<dyn UpdateHandler>>>,
    handler_cache: Mutex<HashMap<String, Vec<Arc<dyn UpdateHandler>>>>,
}

impl UpdateController {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            handler_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, handler: Arc<dyn UpdateHandler>) {
        #[allow(clippy::unwrap_used)]
        {
            self.handlers.lock().unwrap().push(handler);
            self.handler_cache.lock().unwrap().clear();
        }
    }

    pub fn handle(&self, paths: &[String]) {
        #[allow(clippy::unwrap_used)]
        let handlers = self.handlers.lock().unwrap().clone();
        #[allow(clippy::unwrap_used)]
        let mut cache = self.handler_cache.lock().unwrap();

        let mut to_invoke: Vec<Arc<dyn UpdateHandler>> = Vec::new();
        let mut seen: Vec<*const ()> = Vec::new();

        for path in paths {
            let matched = cache.entry(path.clone()).or_insert_with(|| {
                handlers
                    .iter()
                    .filter(|h| h.matcher().matches(path))
                    .cloned()
                    .collect()
            });
            for handler in matched.iter() {
                let ptr = Arc::as_ptr(handler) as *const ();
                if !seen.contains(&ptr) {
                    seen.push(ptr);
                    to_invoke.push(handler.clone());
                }
            }
        }
        drop(cache);

        for handler in to_invoke {
            handler.handle_update();
            meshmon_telemetry::metrics().inc_handler_invocation(handler_name(&handler));
        }
    }

    pub fn stop(&self) {
        #[allow(clippy::unwrap_used)]
        for handler in self.handlers.lock().unwrap().iter() {
            handler.stop();
        }
    }
}

impl Default for UpdateController {
    fn default() -> Self {
        Self::new()
    }
}

/// A coarse label for the handler-invocation metric; handlers don't carry a
/// name of their own, so this derives one from the matcher they registered.
fn handler_name(handler: &Arc<dyn UpdateHandler>) -> &'static str {
    match handler.matcher() {
        crate::matcher::PathMatcher::Exact(_) => "exact",
        crate::matcher::PathMatcher::Regex(_) => "regex",
        crate::matcher::PathMatcher::Any(_) => "any",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::PathMatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        matcher: PathMatcher,
        calls: AtomicUsize,
    }

    impl UpdateHandler for CountingHandler {
        fn matcher(&self) -> &PathMatcher {
            &self.matcher
        }

        fn handle_update(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handler_matching_two_paths_in_one_batch_runs_once() {
        let controller = UpdateController::new();
        let handler = Arc::new(CountingHandler {
            matcher: PathMatcher::regex(&["^a\\."]).expect("valid"),
            calls: AtomicUsize::new(0),
        });
        controller.add(handler.clone());

        controller.handle(&["a.x".to_string(), "a.y".to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // A cached path still triggers exactly one invocation per batch.
        controller.handle(&["a.x".to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unrelated_paths_do_not_trigger_the_handler() {
        let controller = UpdateController::new();
        let handler = Arc::new(CountingHandler {
            matcher: PathMatcher::exact("a.x"),
            calls: AtomicUsize::new(0),
        });
        controller.add(handler.clone());
        controller.handle(&["b.z".to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
