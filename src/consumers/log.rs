//! The logging collaborator and the re-entrancy guard around it.

use std::cell::Cell;
use std::sync::Arc;

use crate::consumers::Consumer;
use crate::counters::{Counter, Reading};

/// External log sink invoked for counters created with log mirroring and
/// for persistence errors. [`TracingSink`] is the default implementation.
pub trait LogSink: Send + Sync {
    /// Emit a human-readable trace line.
    fn info(&self, message: &str);

    /// Emit an error line.
    fn error(&self, message: &str);
}

/// Default [`LogSink`] backed by the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!(target: "telemetria", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "telemetria", "{message}");
    }
}

thread_local! {
    /// Set while the current thread is inside a sink call. A counter
    /// updated from within the logging path would otherwise trigger the
    /// sink again and recurse.
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// RAII marker for a sink invocation on the current thread.
pub(crate) struct SinkGuard(());

impl Drop for SinkGuard {
    fn drop(&mut self) {
        IN_SINK.set(false);
    }
}

/// Enters the sink on this thread, or `None` if the thread is already
/// inside it (the caller must then skip logging).
pub(crate) fn sink_guard() -> Option<SinkGuard> {
    if IN_SINK.get() {
        None
    } else {
        IN_SINK.set(true);
        Some(SinkGuard(()))
    }
}

/// A consumer that mirrors every update of the counters it accepts to a
/// [`LogSink`]. Accepts all counters by default.
pub struct LoggingConsumer {
    sink: Arc<dyn LogSink>,
}

impl LoggingConsumer {
    /// Creates a logging consumer writing to the default [`TracingSink`].
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Creates a logging consumer writing to the given sink.
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl Default for LoggingConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer for LoggingConsumer {
    fn supports_counter(&self, _counter: &Counter) -> bool {
        true
    }

    fn on_update(&self, counter: &Counter, reading: &Reading) {
        // Skip when the sink itself produced this update.
        let Some(_guard) = sink_guard() else { return };
        let line = match reading.duration {
            Some(elapsed) => format!(
                "{}: {} ({}/{}) in {:.3}s",
                counter.name(),
                reading.message.as_deref().unwrap_or("timing"),
                reading.value,
                reading.total,
                elapsed.as_secs_f64()
            ),
            None => format!(
                "{}: {} (total {})",
                counter.name(),
                reading.value,
                reading.total
            ),
        };
        self.sink.info(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CounterRegistry;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        lines: Mutex<Vec<String>>,
    }

    impl LogSink for CapturingSink {
        fn info(&self, message: &str) {
            self.lines.lock().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    /// A sink that itself updates a log-enabled counter, which must not
    /// produce a second generation of log lines.
    struct ReentrantSink {
        registry: Arc<CounterRegistry>,
        lines: Mutex<Vec<String>>,
    }

    impl LogSink for ReentrantSink {
        fn info(&self, message: &str) {
            self.lines.lock().push(message.to_string());
            self.registry.get_counter("log.lines").inc();
        }

        fn error(&self, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    #[test]
    fn test_guard_blocks_nested_entry() {
        let outer = sink_guard();
        assert!(outer.is_some());
        assert!(sink_guard().is_none());
        drop(outer);
        assert!(sink_guard().is_some());
    }

    #[test]
    fn test_log_messages_counter_mirrors_every_update() {
        let registry = CounterRegistry::new();
        let sink = Arc::new(CapturingSink::default());
        registry.set_log_sink(sink.clone());

        let compile = registry
            .counter("Compile")
            .log_messages(true)
            .register()
            .unwrap();
        compile.inc();
        compile.inc_with("unit built");

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Compile"));
        assert!(lines[1].contains("unit built"));
    }

    #[test]
    fn test_counter_updated_inside_sink_stays_out_of_the_log() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let registry = Arc::new(CounterRegistry::new());
        registry
            .counter("log.lines")
            .log_messages(true)
            .register()
            .unwrap();
        let sink = Arc::new(ReentrantSink {
            registry: Arc::clone(&registry),
            lines: Mutex::new(Vec::new()),
        });
        registry.set_log_sink(sink.clone());

        let compile = registry
            .counter("Compile")
            .log_messages(true)
            .register()
            .unwrap();
        compile.inc();
        compile.inc();

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("Compile")));
        assert!(lines.iter().all(|l| !l.contains("log.lines")));
        drop(lines);

        // The nested updates themselves still land, silently.
        assert_eq!(registry.get_counter("log.lines").total(), 2);
    }

    #[test]
    fn test_logging_consumer_mirrors_accepted_counters() {
        let registry = CounterRegistry::new();
        let sink = Arc::new(CapturingSink::default());
        registry.register_consumer(Arc::new(LoggingConsumer::with_sink(sink.clone())));

        let requests = registry.get_counter("Requests");
        requests.add(3);

        let lines = sink.lines.lock();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Requests"));
        assert!(lines[0].contains('3'));
    }
}
