//! # Telemetria - Process-Wide Instrumentation Counters
//!
//! A Rust library providing a process-wide registry of named, categorized
//! counters and timers, with pluggable consumers, periodic crash-safe
//! persistence and remote snapshot access.
//!
//! ## The Problem
//!
//! Long-running tools accumulate ad-hoc instrumentation: a counter here, a
//! stopwatch there, each with its own lifetime, its own logging and its own
//! way of getting the numbers out of the process. The result is telemetry
//! that is hard to aggregate, impossible to snapshot consistently, and
//! invisible from outside the process.
//!
//! ## The Solution: A Counter Registry
//!
//! This library centralizes instrumentation in a
//! [`CounterRegistry`](registry::CounterRegistry): counters are created by
//! name, grouped into categories, and updated through cheap atomic
//! operations. Everything else hangs off the registry:
//!
//! 1. **Consumers**: implementations of [`Consumer`](consumers::Consumer)
//!    subscribe to the registry and receive every update of the counters
//!    they claim, synchronously and in per-counter order. A panicking
//!    consumer is isolated and logged, never propagated into the
//!    instrumented code.
//!
//! 2. **Timers**: a [`TimerCounter`](counters::TimerCounter) hands out
//!    [`TimeTracker`](counters::TimeTracker) spans. Ending a span (or
//!    dropping it) commits the elapsed time into the counter's aggregate
//!    statistics; spans shorter than the timer's threshold stay out of
//!    consumers' way but still count.
//!
//! 3. **Snapshots**: [`snapshot`](registry::CounterRegistry::snapshot)
//!    captures a consistent point-in-time view that can be serialized to
//!    a round-trippable binary form or to human-oriented JSON.
//!
//! 4. **Persistence & remote access**: a
//!    [`PersistenceScheduler`](persist::PersistenceScheduler) saves
//!    snapshots on an interval with atomic-rename durability, and a
//!    [`RemoteEndpoint`](remote::RemoteEndpoint) serves snapshot data to
//!    out-of-process viewers over TCP.
//!
//! ### Design Principles
//!
//! - **Cheap when unobserved**: with no subscribers and no log mirroring,
//!   an update is a pair of relaxed atomic operations on
//!   [`crossbeam_utils::CachePadded`] cells. The per-counter lock is only
//!   taken when someone is listening.
//!
//! - **Ordered when observed**: while a counter has subscribers, value
//!   math and notification happen under the counter's lock, so each
//!   consumer sees that counter's readings in a total order.
//!
//! - **Counters outlive their registration**: re-creating a counter under
//!   an existing name disposes the old instance. Holders of the old
//!   handle keep a valid, silent counter instead of a dangling one.
//!
//! ## Quick Start
//!
//! ```rust
//! use telemetria::registry::CounterRegistry;
//!
//! let registry = CounterRegistry::new();
//!
//! // Counters spring into existence on first use.
//! let requests = registry.get_counter("Requests");
//! requests.inc();
//! requests.add(5);
//!
//! // Timers measure spans; ending the span commits it.
//! let parse = registry
//!     .counter("Parse")
//!     .category("Frontend")
//!     .register_timer()?;
//! let span = parse.begin("main.rs");
//! // ... work ...
//! span.end();
//!
//! // A snapshot is a consistent view of everything above.
//! let snapshot = registry.snapshot();
//! assert_eq!(snapshot.get_counter("Requests").unwrap().total(), 6);
//! # Ok::<(), telemetria::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `table` | [`consumers::table`] | Pretty-print snapshots as ASCII tables |
//!
//! ## Thread Safety
//!
//! The registry and every counter handle are `Send + Sync`; counters are
//! shared as `Arc<Counter>` and updated from any thread. Consumer
//! callbacks run on the updating thread, so consumers must be fast and
//! must not update counters themselves.

pub mod consumers;
pub mod counters;
pub mod error;
pub mod persist;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod snapshot;

pub use consumers::{Consumer, LogSink, LoggingConsumer, TracingSink};
pub use counters::{
    Counter, CounterCategory, Reading, TimeTracker, TimerCounter, TimerStats, TracePoint,
};
pub use error::{Error, Result};
pub use persist::PersistenceScheduler;
pub use progress::ProgressBridge;
pub use registry::{CounterRegistry, DEFAULT_CATEGORY};
pub use remote::{RemoteEndpoint, RemoteRegistry};
pub use snapshot::{Snapshot, SnapshotData};
