//! Progress reporting for long-running jobs

/// Receiver of `(message, fraction)` updates. `fraction` is in [0, 1].
pub trait ProgressSink: Send + Sync {
    /// Report one step
    fn report(&self, message: &str, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, f64) + Send + Sync,
{
    fn report(&self, message: &str, fraction: f64) {
        self(message, fraction)
    }
}

/// Sink that discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _message: &str, _fraction: f64) {}
}

/// Counts numbered jobs and forwards `"{message} ({current}/{total})"` to a sink
pub(crate) struct JobCounter<'a> {
    sink: &'a dyn ProgressSink,
    total: usize,
}

impl<'a> JobCounter<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        Self { sink, total }
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn step(&self, message: &str, current: usize) {
        let fraction = if self.total > 0 {
            (current as f64 / self.total as f64).min(1.0)
        } else {
            0.0
        };
        self.sink
            .report(&format!("{} ({}/{})", message, current, self.total), fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink_and_counter() {
        let seen = Mutex::new(Vec::new());
        let sink = |msg: &str, f: f64| seen.lock().unwrap().push((msg.to_string(), f));
        let counter = JobCounter::new(&sink, 4);
        counter.step("Found 2 vehicles", 2);
        counter.step("Saving metadata", 4);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen[0], ("Found 2 vehicles (2/4)".to_string(), 0.5));
        assert_eq!(seen[1].1, 1.0);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_noop_sink() {
        NoopProgress.report("ignored", 0.3);
    }
}
