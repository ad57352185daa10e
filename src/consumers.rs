//! Pluggable observers of counter updates.
//!
//! A [`Consumer`] is an arbitrary external sink (a UI panel, a log
//! mirror, a test probe) that registers with the registry and is offered
//! every counter through [`Consumer::supports_counter`]. Counters keep the
//! subset of consumers that accepted them and notify that subset
//! synchronously, in registration order, on every state change. The
//! capability check runs once, at registration or counter creation, never
//! on the update path.
//!
//! Registering the same consumer twice means it is dispatched twice; there
//! is no implicit de-duplication. Unregistering a consumer that was never
//! registered is a no-op.
//!
//! # Failure isolation
//!
//! A panic inside one consumer hook is caught, logged and discarded: it
//! cannot stop delivery to the remaining consumers for that event, corrupt
//! the counter, or surface in the producer that triggered the update.
//!
//! # Re-entrancy
//!
//! Hooks run while a counter lock (updates) or the registry lock
//! (creation, registration changes, status refreshes) is held. A hook must
//! not call back into the registry or mutate counters; doing so deadlocks.

mod log;

#[cfg(feature = "table")]
pub mod table;

pub use log::{LogSink, LoggingConsumer, TracingSink};

pub(crate) use log::sink_guard;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::counters::{Counter, Reading};

/// A pluggable observer notified of updates to the counters it accepts.
pub trait Consumer: Send + Sync {
    /// Capability check: does this consumer want updates from `counter`?
    ///
    /// Evaluated when the consumer is registered and when a counter is
    /// created, never on the update path.
    fn supports_counter(&self, counter: &Counter) -> bool;

    /// Called synchronously, on the updating thread, with the new reading.
    fn on_update(&self, counter: &Counter, reading: &Reading);

    /// Called when instrumentation is globally enabled or disabled, and
    /// after registration changes, so the consumer can adjust without the
    /// registry being torn down.
    fn on_status(&self, counter: &Counter, enabled: bool) {
        let _ = (counter, enabled);
    }
}

/// Delivers a reading to every subscriber, isolating panics per consumer.
pub(crate) fn deliver(subscribers: &[Arc<dyn Consumer>], counter: &Counter, reading: &Reading) {
    for consumer in subscribers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| consumer.on_update(counter, reading)));
        if outcome.is_err() {
            tracing::warn!(counter = counter.name(), "consumer panicked during update dispatch");
        }
    }
}

/// Delivers a status change to every subscriber, isolating panics.
pub(crate) fn deliver_status(subscribers: &[Arc<dyn Consumer>], counter: &Counter, enabled: bool) {
    for consumer in subscribers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| consumer.on_status(counter, enabled)));
        if outcome.is_err() {
            tracing::warn!(counter = counter.name(), "consumer panicked during status dispatch");
        }
    }
}
