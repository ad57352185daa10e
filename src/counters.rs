//! Counter data model: counters, timer counters and categories.
//!
//! A [`Counter`] holds a live value plus a monotonic lifetime total for one
//! named metric and carries its own list of subscribed consumers. A
//! [`TimerCounter`] is a counter specialized to record elapsed-duration
//! samples through open/close [`TimeTracker`] spans. Counters are grouped
//! into lazily-created, insertion-ordered [`CounterCategory`] instances.
//!
//! # Update path
//!
//! The hot values (`count`, `total_count`) live in cache-padded relaxed
//! atomics. A counter nobody observes (no subscribed consumers, no log
//! mirroring) is updated with plain atomic ops and no lock, so
//! high-frequency increments from many threads never serialize against
//! registry churn. As soon as a counter has observers, updates take the
//! counter's own mutex for the duration of the value math *and* the
//! synchronous consumer notification, which is what gives each consumer a
//! total order of readings per counter. There is no cross-counter ordering.
//!
//! Counters are handed out as `Arc<Counter>`; a counter superseded by a
//! same-name re-creation is marked disposed and goes silent, but every
//! existing `Arc` stays valid and in-flight updates complete normally.

pub mod category;
pub mod counter;
pub mod timer;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::consumers::{LogSink, TracingSink};

/// One observed update, delivered synchronously to every consumer
/// subscribed to the counter that produced it.
#[derive(Debug, Clone)]
pub struct Reading {
    /// The counter's live value after the update.
    pub value: i64,
    /// The counter's lifetime total after the update.
    pub total: i64,
    /// Wall-clock time the update was committed.
    pub timestamp: SystemTime,
    /// Caller-supplied message, if any (timer commits carry their label).
    pub message: Option<String>,
    /// Elapsed duration for timer commits; `None` for plain value updates.
    pub duration: Option<Duration>,
    /// Intermediate markers recorded while a timing span was open.
    pub traces: Vec<TracePoint>,
}

/// An intermediate marker recorded inside an open timing span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracePoint {
    /// Offset from the start of the span.
    pub offset: Duration,
    /// The marker text.
    pub message: String,
}

/// Per-timer running statistics, also the serialized form in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStats {
    /// Number of committed timing spans.
    pub samples: u64,
    /// Cumulative elapsed time across all spans.
    pub total_time: Duration,
    /// Shortest committed span, `None` until the first commit.
    pub min_time: Option<Duration>,
    /// Longest committed span.
    pub max_time: Duration,
}

/// State a registry shares with every counter it creates: the process-wide
/// dispatch kill switch and the log collaborator.
pub(crate) struct RegistryShared {
    pub(crate) enabled: AtomicBool,
    pub(crate) sink: Mutex<Arc<dyn LogSink>>,
}

impl RegistryShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            sink: Mutex::new(Arc::new(TracingSink)),
        })
    }
}

pub use category::CounterCategory;
pub use counter::Counter;
pub use timer::{TimeTracker, TimerCounter};
