//! Named, insertion-ordered groupings of counters.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::counters::Counter;

/// A named grouping of counters, created lazily the first time a counter
/// references it. The category set only grows for the process lifetime;
/// member lists change only when counters are created or superseded.
pub struct CounterCategory {
    name: String,
    counters: Mutex<Vec<Arc<Counter>>>,
}

impl CounterCategory {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Mutex::new(Vec::new()),
        }
    }

    /// The category's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The member counters in insertion order, as a defensive copy.
    pub fn counters(&self) -> Vec<Arc<Counter>> {
        self.counters.lock().clone()
    }

    /// Number of member counters.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// True when the category has no members.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }

    /// Looks up a member by name.
    pub fn find(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters
            .lock()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub(crate) fn push(&self, counter: Arc<Counter>) {
        self.counters.lock().push(counter);
    }

    /// Drops a superseded member so it never shadows its replacement.
    pub(crate) fn remove(&self, counter: &Arc<Counter>) {
        let mut counters = self.counters.lock();
        if let Some(pos) = counters.iter().position(|c| Arc::ptr_eq(c, counter)) {
            counters.remove(pos);
        }
    }
}

impl Debug for CounterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .counters
            .lock()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        f.debug_struct("CounterCategory")
            .field("name", &self.name)
            .field("counters", &names)
            .finish()
    }
}
