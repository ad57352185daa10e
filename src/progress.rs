//! Adapter mapping task-scoped progress reporting onto a timer counter.
//!
//! Progress APIs report nested begin/end task pairs with free-form log
//! lines in between. The bridge turns each named task into a timed span
//! on one shared [`TimerCounter`] and attaches the log lines of the
//! innermost named task as trace points, so an existing progress surface
//! feeds timing data without knowing counters exist.

use crate::counters::{TimeTracker, TimerCounter};

/// Stack-shaped bridge from begin/end progress callbacks to timer spans.
///
/// Not thread safe by design: a progress reporter is driven by a single
/// worker, and the begin/end pairing is meaningless across threads.
pub struct ProgressBridge {
    timer: TimerCounter,
    stack: Vec<Option<TimeTracker>>,
}

impl ProgressBridge {
    pub fn new(timer: TimerCounter) -> Self {
        Self {
            timer,
            stack: Vec::new(),
        }
    }

    /// The timer the bridge reports into.
    pub fn timer(&self) -> &TimerCounter {
        &self.timer
    }

    /// Depth of currently open tasks, named or not.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Opens a task. A named task starts a timed span; an anonymous task
    /// (no label, or an empty one) only occupies a stack slot so its
    /// matching `end_task` stays paired.
    pub fn begin_task(&mut self, label: Option<&str>) {
        let tracker = label
            .filter(|label| !label.is_empty())
            .map(|label| self.timer.begin(label));
        self.stack.push(tracker);
    }

    /// Closes the innermost task, committing its span if it was named.
    /// An unmatched call is reported and otherwise ignored.
    pub fn end_task(&mut self) {
        match self.stack.pop() {
            Some(Some(tracker)) => {
                tracker.end();
            }
            Some(None) => {}
            None => {
                tracing::warn!(
                    counter = %self.timer.counter().name(),
                    "end_task without matching begin_task"
                );
            }
        }
    }

    /// Records a progress line. It becomes a trace point on the innermost
    /// named task; with no named task open the line is dropped, since
    /// there is no span to attach it to.
    pub fn log(&mut self, message: impl Into<String>) {
        if let Some(Some(tracker)) = self.stack.last_mut() {
            tracker.trace(message);
        }
    }
}

impl Drop for ProgressBridge {
    fn drop(&mut self) {
        // Open named tasks commit through TimeTracker's own drop.
        if !self.stack.is_empty() {
            tracing::warn!(
                counter = %self.timer.counter().name(),
                open = self.stack.len(),
                "progress bridge dropped with open tasks"
            );
        }
    }
}
