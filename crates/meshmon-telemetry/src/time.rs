use crate::sinks::MetricsSink;
use std::time::Instant;

/// RAII timer recording a batch-processing duration on drop.
pub struct Timer<'a> {
    sink: &'a dyn MetricsSink,
    queue: &'static str,
    start: Instant,
}

impl<'a> Timer<'a> {
    pub fn new(sink: &'a dyn MetricsSink, queue: &'static str) -> Self {
        Self {
            sink,
            queue,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_batch_duration(self.queue, self.start.elapsed().as_secs_f64());
    }
}
