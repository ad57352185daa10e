//! The counter data unit: live value, lifetime total, subscribers.

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::consumers::{self, sink_guard, Consumer};
use crate::counters::timer::TimerCounter;
use crate::counters::{Reading, RegistryShared, TimerStats, TracePoint};

/// Construction parameters for a counter; assembled by the registry's
/// builder, split out so counters can be built in isolation in tests.
pub(crate) struct CounterSpec {
    pub name: String,
    pub id: Option<String>,
    pub category: String,
    pub log_messages: bool,
    /// `Some(threshold)` makes this a timer counter.
    pub timer: Option<Duration>,
}

pub(crate) struct TimerState {
    pub(crate) threshold: Duration,
    pub(crate) stats: Mutex<TimerStats>,
}

enum Op {
    /// Raise both `count` and `total_count`.
    Add(i64),
    /// Lower `count` only.
    Sub(i64),
    /// Replace `count`; `total_count` untouched.
    Set(i64),
}

/// A named running statistic: current value plus monotonic lifetime total.
///
/// Counters are created through
/// [`CounterRegistry`](crate::registry::CounterRegistry) and shared as
/// `Arc<Counter>`. At most one *live* counter owns a given name in a
/// registry; re-creating the name disposes the old instance, which stays
/// valid for existing holders but receives no further consumer
/// notifications.
///
/// Updates from any thread are lock-free while nobody observes the counter;
/// with subscribers attached (or log mirroring on) each update takes the
/// counter's own mutex across the value math and the synchronous
/// notification, so a single consumer sees a total order of readings per
/// counter.
pub struct Counter {
    name: String,
    id: Option<String>,
    category: String,
    log_messages: bool,
    count: CachePadded<AtomicI64>,
    total_count: CachePadded<AtomicI64>,
    disposed: AtomicBool,
    /// Mirrors `!subscribers.is_empty()` so the fast path can skip the lock.
    observed: AtomicBool,
    subscribers: Mutex<Vec<Arc<dyn Consumer>>>,
    timer: Option<TimerState>,
    shared: Arc<RegistryShared>,
}

impl Counter {
    pub(crate) fn new(spec: CounterSpec, shared: Arc<RegistryShared>) -> Self {
        Self {
            name: spec.name,
            id: spec.id,
            category: spec.category,
            log_messages: spec.log_messages,
            count: CachePadded::new(AtomicI64::new(0)),
            total_count: CachePadded::new(AtomicI64::new(0)),
            disposed: AtomicBool::new(false),
            observed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            timer: spec.timer.map(|threshold| TimerState {
                threshold,
                stats: Mutex::new(TimerStats::default()),
            }),
            shared,
        }
    }

    /// The counter's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional secondary lookup key.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Name of the owning category.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether updates are mirrored to the log collaborator.
    pub fn log_messages(&self) -> bool {
        self.log_messages
    }

    /// True once this counter has been superseded by a same-name
    /// re-creation. Disposed counters still accept updates but stay silent.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Whether this counter records timing spans.
    pub fn is_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// The counter's current live value.
    pub fn value(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// The monotonic lifetime total.
    pub fn total(&self) -> i64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Running timing statistics, if this is a timer counter.
    pub fn timer_stats(&self) -> Option<TimerStats> {
        self.timer.as_ref().map(|t| t.stats.lock().clone())
    }

    /// A [`TimerCounter`] handle over this counter, if it was created as a
    /// timer.
    pub fn as_timer(self: &Arc<Self>) -> Option<TimerCounter> {
        self.is_timer().then(|| TimerCounter::from_counter(Arc::clone(self)))
    }

    /// Increments the value and the lifetime total by one.
    pub fn inc(&self) {
        self.update(Op::Add(1), None);
    }

    /// Increments by one, attaching a message to the delivered reading
    /// (and to the log line when log mirroring is on).
    pub fn inc_with(&self, message: impl Into<String>) {
        self.update(Op::Add(1), Some(message.into()));
    }

    /// Decrements the value by one; the lifetime total is untouched.
    pub fn dec(&self) {
        self.update(Op::Sub(1), None);
    }

    /// Adds `amount` to the value and the lifetime total.
    pub fn add(&self, amount: i64) {
        self.update(Op::Add(amount), None);
    }

    /// Subtracts `amount` from the value; the lifetime total is untouched.
    pub fn sub(&self, amount: i64) {
        self.update(Op::Sub(amount), None);
    }

    /// Replaces the value; the lifetime total is untouched.
    pub fn set_value(&self, value: i64) {
        self.update(Op::Set(value), None);
    }

    fn apply(&self, op: Op) -> (i64, i64) {
        match op {
            Op::Add(n) => {
                let value = self.count.fetch_add(n, Ordering::Relaxed) + n;
                let total = self.total_count.fetch_add(n, Ordering::Relaxed) + n;
                (value, total)
            }
            Op::Sub(n) => {
                let value = self.count.fetch_sub(n, Ordering::Relaxed) - n;
                (value, self.total_count.load(Ordering::Relaxed))
            }
            Op::Set(v) => {
                self.count.store(v, Ordering::Relaxed);
                (v, self.total_count.load(Ordering::Relaxed))
            }
        }
    }

    fn update(&self, op: Op, message: Option<String>) {
        // Fast path: nobody is watching, no ordering to preserve.
        if !self.observed.load(Ordering::Relaxed) && !self.log_messages {
            self.apply(op);
            return;
        }

        let subscribers = self.subscribers.lock();
        let (value, total) = self.apply(op);
        if self.is_disposed() || !self.shared.enabled.load(Ordering::Relaxed) {
            return;
        }
        let reading = Reading {
            value,
            total,
            timestamp: SystemTime::now(),
            message,
            duration: None,
            traces: Vec::new(),
        };
        consumers::deliver(&subscribers, self, &reading);
        if self.log_messages {
            self.log_reading(&reading);
        }
    }

    /// Commits one finished timing span. Totals and stats always advance;
    /// consumers and the log only hear about spans at or above the timer's
    /// threshold.
    pub(crate) fn commit_timing(
        &self,
        elapsed: Duration,
        label: Option<String>,
        traces: Vec<TracePoint>,
    ) {
        let Some(timer) = self.timer.as_ref() else {
            debug_assert!(false, "commit_timing on a non-timer counter");
            return;
        };

        let subscribers = self.subscribers.lock();
        let (value, total) = self.apply(Op::Add(1));
        {
            let mut stats = timer.stats.lock();
            stats.samples += 1;
            stats.total_time += elapsed;
            stats.min_time = Some(stats.min_time.map_or(elapsed, |m| m.min(elapsed)));
            stats.max_time = stats.max_time.max(elapsed);
        }

        if elapsed < timer.threshold
            || self.is_disposed()
            || !self.shared.enabled.load(Ordering::Relaxed)
        {
            return;
        }
        let reading = Reading {
            value,
            total,
            timestamp: SystemTime::now(),
            message: label,
            duration: Some(elapsed),
            traces,
        };
        consumers::deliver(&subscribers, self, &reading);
        if self.log_messages {
            self.log_reading(&reading);
        }
    }

    /// Threshold below which timings are not reported, if this is a timer.
    pub fn threshold(&self) -> Option<Duration> {
        self.timer.as_ref().map(|t| t.threshold)
    }

    fn log_reading(&self, reading: &Reading) {
        // Re-entrancy guard: a counter touched from inside the sink must
        // not log again.
        let Some(_guard) = sink_guard() else { return };
        let line = match (reading.duration, reading.message.as_deref()) {
            (Some(elapsed), label) => format!(
                "{}: {} took {:.3}s",
                self.name,
                label.unwrap_or("timing"),
                elapsed.as_secs_f64()
            ),
            (None, Some(message)) => {
                format!("{}: {} ({}) {}", self.name, reading.value, reading.total, message)
            }
            (None, None) => format!("{}: {} ({})", self.name, reading.value, reading.total),
        };
        let sink = self.shared.sink.lock().clone();
        sink.info(&line);
    }

    pub(crate) fn attach(&self, consumer: Arc<dyn Consumer>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.push(consumer);
        self.observed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn detach(&self, consumer: &Arc<dyn Consumer>) {
        let mut subscribers = self.subscribers.lock();
        if let Some(pos) = subscribers.iter().position(|c| Arc::ptr_eq(c, consumer)) {
            subscribers.remove(pos);
        }
        self.observed
            .store(!subscribers.is_empty(), Ordering::Relaxed);
    }

    pub(crate) fn detach_all(&self) {
        self.subscribers.lock().clear();
        self.observed.store(false, Ordering::Relaxed);
    }

    /// Marks this counter superseded: the subscriber list is cleared so it
    /// goes silent, while existing holders keep a valid object.
    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
        self.detach_all();
    }

    pub(crate) fn refresh_status(&self, enabled: bool) {
        let subscribers = self.subscribers.lock();
        consumers::deliver_status(&subscribers, self, enabled);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value())
    }
}

impl Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("count", &self.value())
            .field("total_count", &self.total())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
