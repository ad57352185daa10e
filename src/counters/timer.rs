//! Timer counters and open timing spans.
//!
//! A [`TimerCounter`] is a handle over a [`Counter`] created with timer
//! state. [`TimerCounter::begin`] opens a [`TimeTracker`] span;
//! [`TimeTracker::end`] commits the elapsed duration into the counter
//! exactly once. `end` consumes the tracker, so a double close cannot
//! compile, and dropping an un-ended tracker commits it, so an error path
//! cannot leak an in-flight timing.
//!
//! Spans shorter than the counter's threshold still advance the totals and
//! the running statistics but are not reported to consumers or the log.

use std::fmt::{self, Debug};
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::counters::{Counter, TimerStats, TracePoint};

/// A counter specialized to record elapsed-duration samples.
///
/// Cloning is cheap; both handles drive the same underlying counter.
///
/// # Examples
///
/// ```rust
/// use telemetria::CounterRegistry;
///
/// let registry = CounterRegistry::new();
/// let timer = registry.create_timer("build.link").unwrap();
///
/// let mut span = timer.begin("link debug target");
/// span.trace("objects collected");
/// let _elapsed = span.end();
///
/// assert_eq!(timer.total(), 1);
/// assert_eq!(timer.stats().samples, 1);
/// ```
#[derive(Clone)]
pub struct TimerCounter {
    inner: Arc<Counter>,
}

impl TimerCounter {
    pub(crate) fn from_counter(inner: Arc<Counter>) -> Self {
        debug_assert!(inner.is_timer());
        Self { inner }
    }

    /// The underlying counter.
    pub fn counter(&self) -> &Arc<Counter> {
        &self.inner
    }

    /// Threshold below which committed spans are not reported.
    pub fn threshold(&self) -> Duration {
        self.inner.threshold().unwrap_or(Duration::ZERO)
    }

    /// Snapshot of the running timing statistics.
    pub fn stats(&self) -> TimerStats {
        self.inner.timer_stats().unwrap_or_default()
    }

    /// Opens a timing span labelled `label`. The span commits into this
    /// counter when ended (or dropped).
    pub fn begin(&self, label: impl Into<String>) -> TimeTracker {
        TimeTracker {
            counter: Arc::clone(&self.inner),
            label: Some(label.into()),
            start: Instant::now(),
            traces: Vec::new(),
            done: false,
        }
    }
}

impl Deref for TimerCounter {
    type Target = Counter;

    fn deref(&self) -> &Counter {
        &self.inner
    }
}

impl Debug for TimerCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCounter")
            .field("name", &self.inner.name())
            .field("threshold", &self.threshold())
            .field("stats", &self.stats())
            .finish()
    }
}

/// One open timing span. Must be closed exactly once: [`end`](Self::end)
/// consumes the tracker, and dropping an un-ended tracker commits it.
#[must_use = "an unused tracker commits a near-zero timing immediately"]
pub struct TimeTracker {
    counter: Arc<Counter>,
    label: Option<String>,
    start: Instant,
    traces: Vec<TracePoint>,
    done: bool,
}

impl TimeTracker {
    /// Records an intermediate marker without ending the span.
    pub fn trace(&mut self, message: impl Into<String>) {
        self.traces.push(TracePoint {
            offset: self.start.elapsed(),
            message: message.into(),
        });
    }

    /// Time elapsed since the span was opened.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// The span's label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Closes the span and commits its duration into the counter.
    pub fn end(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        self.done = true;
        let elapsed = self.start.elapsed();
        self.counter
            .commit_timing(elapsed, self.label.take(), mem::take(&mut self.traces));
        elapsed
    }
}

impl Drop for TimeTracker {
    fn drop(&mut self) {
        if !self.done {
            self.finish();
        }
    }
}

impl Debug for TimeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeTracker")
            .field("counter", &self.counter.name())
            .field("label", &self.label)
            .field("elapsed", &self.start.elapsed())
            .field("traces", &self.traces.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::Consumer;
    use crate::counters::counter::CounterSpec;
    use crate::counters::{Reading, RegistryShared};
    use parking_lot::Mutex;
    use std::thread;

    fn timer_with_threshold(threshold: Duration) -> TimerCounter {
        let counter = Arc::new(Counter::new(
            CounterSpec {
                name: "timed".to_string(),
                id: None,
                category: "Global".to_string(),
                log_messages: false,
                timer: Some(threshold),
            },
            RegistryShared::new(),
        ));
        TimerCounter::from_counter(counter)
    }

    #[derive(Default)]
    struct Recorder {
        readings: Mutex<Vec<Reading>>,
    }

    impl Consumer for Recorder {
        fn supports_counter(&self, _counter: &Counter) -> bool {
            true
        }
        fn on_update(&self, _counter: &Counter, reading: &Reading) {
            self.readings.lock().push(reading.clone());
        }
    }

    #[test]
    fn test_end_commits_totals_and_stats() {
        let timer = timer_with_threshold(Duration::ZERO);
        let span = timer.begin("step");
        let elapsed = span.end();

        assert_eq!(timer.total(), 1);
        let stats = timer.stats();
        assert_eq!(stats.samples, 1);
        assert!(stats.total_time >= Duration::ZERO);
        assert_eq!(stats.min_time, Some(stats.max_time));
        assert!(stats.max_time <= elapsed);
    }

    #[test]
    fn test_below_threshold_updates_totals_but_not_consumers() {
        let timer = timer_with_threshold(Duration::from_secs(60));
        let recorder = Arc::new(Recorder::default());
        timer.counter().attach(recorder.clone());

        timer.begin("fast").end();

        assert_eq!(timer.total(), 1);
        assert_eq!(timer.stats().samples, 1);
        assert!(recorder.readings.lock().is_empty());
    }

    #[test]
    fn test_at_or_above_threshold_notifies_exactly_once() {
        let timer = timer_with_threshold(Duration::from_millis(5));
        let recorder = Arc::new(Recorder::default());
        timer.counter().attach(recorder.clone());

        let span = timer.begin("slow");
        thread::sleep(Duration::from_millis(10));
        span.end();

        let readings = recorder.readings.lock();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].message.as_deref(), Some("slow"));
        assert!(readings[0].duration.unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_traces_ride_along_with_the_reading() {
        let timer = timer_with_threshold(Duration::ZERO);
        let recorder = Arc::new(Recorder::default());
        timer.counter().attach(recorder.clone());

        let mut span = timer.begin("traced");
        span.trace("first marker");
        span.trace("second marker");
        span.end();

        let readings = recorder.readings.lock();
        assert_eq!(readings[0].traces.len(), 2);
        assert_eq!(readings[0].traces[0].message, "first marker");
        assert!(readings[0].traces[1].offset >= readings[0].traces[0].offset);
    }

    #[test]
    fn test_drop_commits_an_unended_span() {
        let timer = timer_with_threshold(Duration::ZERO);
        {
            let _span = timer.begin("abandoned");
        }
        assert_eq!(timer.total(), 1);
        assert_eq!(timer.stats().samples, 1);
    }

    #[test]
    fn test_min_max_track_extremes() {
        let timer = timer_with_threshold(Duration::ZERO);
        timer.begin("a").end();
        let span = timer.begin("b");
        thread::sleep(Duration::from_millis(5));
        span.end();

        let stats = timer.stats();
        assert_eq!(stats.samples, 2);
        assert!(stats.min_time.unwrap() <= stats.max_time);
        assert!(stats.max_time >= Duration::from_millis(5));
    }
}
