//! The counter registry: creation, lookup, replacement, consumer fan-out.
//!
//! [`CounterRegistry`] owns all counters and categories of one
//! instrumentation domain. It is an explicit object with a controlled
//! lifecycle: construct one per process (or one per test) and pass it by
//! `Arc`; there is no ambient global state.
//!
//! # Locking discipline
//!
//! One coarse mutex guards the structural collections: the name map, the id
//! map, the category list and the consumer list. It is held for lookups,
//! creation and replacement, consumer registration changes, the enable
//! toggle and snapshot copies. It is *not* held for per-counter value
//! updates, which only synchronize on the counter they touch. Consumer callbacks
//! fired during creation or registration run under this lock and must not
//! call back into the registry (see [`Consumer`](crate::Consumer)).
//!
//! # Examples
//!
//! ```rust
//! use telemetria::CounterRegistry;
//!
//! let registry = CounterRegistry::new();
//! let compile = registry
//!     .counter("Compile")
//!     .category("Build")
//!     .register()
//!     .unwrap();
//!
//! compile.inc();
//! compile.inc();
//! compile.inc();
//!
//! let counters = registry.get_counters();
//! assert_eq!(counters.len(), 1);
//! assert_eq!(counters[0].name(), "Compile");
//! assert_eq!(counters[0].total(), 3);
//! assert_eq!(counters[0].category(), "Build");
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::consumers::{Consumer, LogSink};
use crate::counters::counter::CounterSpec;
use crate::counters::{Counter, CounterCategory, RegistryShared, TimerCounter};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Category assigned to counters created without an explicit one.
pub const DEFAULT_CATEGORY: &str = "Global";

struct RegistryState {
    by_name: HashMap<String, Arc<Counter>>,
    by_id: HashMap<String, Arc<Counter>>,
    categories: Vec<Arc<CounterCategory>>,
    consumers: Vec<Arc<dyn Consumer>>,
}

/// Process-wide store of named, categorized counters and timers.
pub struct CounterRegistry {
    shared: Arc<RegistryShared>,
    start_time: SystemTime,
    state: Mutex<RegistryState>,
}

impl CounterRegistry {
    /// Creates an empty registry; `start_time` is stamped now and becomes
    /// the epoch of every snapshot taken from it.
    pub fn new() -> Self {
        Self {
            shared: RegistryShared::new(),
            start_time: SystemTime::now(),
            state: Mutex::new(RegistryState {
                by_name: HashMap::new(),
                by_id: HashMap::new(),
                categories: Vec::new(),
                consumers: Vec::new(),
            }),
        }
    }

    /// The registry epoch.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Replaces the log collaborator counters write through when created
    /// with log mirroring.
    pub fn set_log_sink(&self, sink: Arc<dyn LogSink>) {
        *self.shared.sink.lock() = sink;
    }

    /// Starts building a counter named `name`. Finish with
    /// [`CounterBuilder::register`] or [`CounterBuilder::register_timer`].
    pub fn counter(&self, name: impl Into<String>) -> CounterBuilder<'_> {
        CounterBuilder {
            registry: self,
            name: name.into(),
            category: None,
            id: None,
            log_messages: false,
            threshold: Duration::ZERO,
        }
    }

    /// Creates a plain counter in the default category.
    pub fn create_counter(&self, name: impl Into<String>) -> Result<Arc<Counter>> {
        self.counter(name).register()
    }

    /// Creates a timer counter in the default category with a zero
    /// reporting threshold.
    pub fn create_timer(&self, name: impl Into<String>) -> Result<TimerCounter> {
        self.counter(name).register_timer()
    }

    fn register_spec(&self, spec: CounterSpec) -> Result<Arc<Counter>> {
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument(
                "counter name must not be empty".into(),
            ));
        }
        let mut state = self.state.lock();
        let counter = Self::insert(&mut state, &self.shared, spec);
        counter.refresh_status(self.shared.enabled.load(Ordering::Relaxed));
        Ok(counter)
    }

    /// Inserts a new counter, superseding any live counter with the same
    /// name. Runs under the registry lock.
    fn insert(
        state: &mut RegistryState,
        shared: &Arc<RegistryShared>,
        spec: CounterSpec,
    ) -> Arc<Counter> {
        let counter = Arc::new(Counter::new(spec, Arc::clone(shared)));

        if let Some(old) = state
            .by_name
            .insert(counter.name().to_string(), Arc::clone(&counter))
        {
            old.dispose();
            if let Some(old_id) = old.id() {
                state.by_id.remove(old_id);
            }
            if let Some(category) = state
                .categories
                .iter()
                .find(|c| c.name() == old.category())
            {
                category.remove(&old);
            }
            tracing::debug!(counter = counter.name(), "superseded live counter");
        }

        if let Some(id) = counter.id() {
            state.by_id.insert(id.to_string(), Arc::clone(&counter));
        }

        let category = match state
            .categories
            .iter()
            .find(|c| c.name() == counter.category())
        {
            Some(category) => Arc::clone(category),
            None => {
                let category = Arc::new(CounterCategory::new(counter.category()));
                state.categories.push(Arc::clone(&category));
                category
            }
        };
        category.push(Arc::clone(&counter));

        for consumer in &state.consumers {
            if consumer.supports_counter(&counter) {
                counter.attach(Arc::clone(consumer));
            }
        }

        counter
    }

    /// Returns the live counter named `name`, creating a bare counter in
    /// the default category on first sight. Never fails.
    pub fn get_counter(&self, name: &str) -> Arc<Counter> {
        let mut state = self.state.lock();
        if let Some(counter) = state.by_name.get(name) {
            return Arc::clone(counter);
        }
        let counter = Self::insert(
            &mut state,
            &self.shared,
            CounterSpec {
                name: name.to_string(),
                id: None,
                category: DEFAULT_CATEGORY.to_string(),
                log_messages: false,
                timer: None,
            },
        );
        counter.refresh_status(self.shared.enabled.load(Ordering::Relaxed));
        counter
    }

    /// Returns the counter registered under `id`, or
    /// [`Error::NotFound`]; id lookups never auto-create.
    pub fn get_counter_by_id(&self, id: &str) -> Result<Arc<Counter>> {
        self.state
            .lock()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Looks up a category by name.
    pub fn get_category(&self, name: &str) -> Option<Arc<CounterCategory>> {
        self.state
            .lock()
            .categories
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// All categories in creation order, as a defensive copy.
    pub fn get_categories(&self) -> Vec<Arc<CounterCategory>> {
        self.state.lock().categories.clone()
    }

    /// All live counters, grouped by category creation order and insertion
    /// order within each category, as a defensive copy.
    pub fn get_counters(&self) -> Vec<Arc<Counter>> {
        self.state
            .lock()
            .categories
            .iter()
            .flat_map(|category| category.counters())
            .collect()
    }

    /// Registers a consumer and retroactively attaches it to every
    /// existing counter it accepts, then refreshes status everywhere.
    /// Registering the same consumer twice doubles its dispatch.
    pub fn register_consumer(&self, consumer: Arc<dyn Consumer>) {
        let mut state = self.state.lock();
        for category in &state.categories {
            for counter in category.counters() {
                if consumer.supports_counter(&counter) {
                    counter.attach(Arc::clone(&consumer));
                }
            }
        }
        state.consumers.push(consumer);
        Self::refresh_all(&state, self.shared.enabled.load(Ordering::Relaxed));
    }

    /// Unregisters one registration of `consumer` (by identity) and
    /// detaches it from every counter, then refreshes status everywhere.
    /// Unregistering a consumer that was never registered is a no-op.
    pub fn unregister_consumer(&self, consumer: &Arc<dyn Consumer>) {
        let mut state = self.state.lock();
        let Some(pos) = state
            .consumers
            .iter()
            .position(|c| Arc::ptr_eq(c, consumer))
        else {
            return;
        };
        state.consumers.remove(pos);
        for category in &state.categories {
            for counter in category.counters() {
                counter.detach(consumer);
            }
        }
        Self::refresh_all(&state, self.shared.enabled.load(Ordering::Relaxed));
    }

    /// Process-wide kill switch. Toggling refreshes the status of every
    /// counter so consumers observe the change without the registry being
    /// torn down.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
        let state = self.state.lock();
        Self::refresh_all(&state, enabled);
    }

    /// Whether dispatch is globally enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    fn refresh_all(state: &RegistryState, enabled: bool) {
        for category in &state.categories {
            for counter in category.counters() {
                counter.refresh_status(enabled);
            }
        }
    }

    /// Captures a point-in-time snapshot: the registry epoch, the capture
    /// time, and copies of the live collections. Counters are shared by
    /// reference, not deep-copied; serialization reads their values at
    /// write time.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let counters = state
            .categories
            .iter()
            .flat_map(|category| category.counters())
            .collect();
        let categories = state.categories.clone();
        Snapshot::new(self.start_time, SystemTime::now(), counters, categories)
    }

    /// Disables dispatch and drops every consumer. Counters stay valid and
    /// keep accepting (now silent) updates.
    pub fn shutdown(&self) {
        self.shared.enabled.store(false, Ordering::Relaxed);
        let mut state = self.state.lock();
        Self::refresh_all(&state, false);
        state.consumers.clear();
        for category in &state.categories {
            for counter in category.counters() {
                counter.detach_all();
            }
        }
    }
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a counter registration; obtained from
/// [`CounterRegistry::counter`].
pub struct CounterBuilder<'a> {
    registry: &'a CounterRegistry,
    name: String,
    category: Option<String>,
    id: Option<String>,
    log_messages: bool,
    threshold: Duration,
}

impl<'a> CounterBuilder<'a> {
    /// Sets the owning category; defaults to [`DEFAULT_CATEGORY`].
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the secondary unique lookup id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mirrors every update to the registry's log sink.
    pub fn log_messages(mut self, log_messages: bool) -> Self {
        self.log_messages = log_messages;
        self
    }

    /// Minimum duration a timing span must reach to be reported to
    /// consumers and the log. Only meaningful with
    /// [`register_timer`](Self::register_timer).
    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    fn into_spec(self, timer: Option<Duration>) -> (CounterSpec, &'a CounterRegistry) {
        let spec = CounterSpec {
            name: self.name,
            id: self.id,
            category: self
                .category
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            log_messages: self.log_messages,
            timer,
        };
        (spec, self.registry)
    }

    /// Registers a plain counter, superseding any live counter with the
    /// same name. Fails with [`Error::InvalidArgument`] on an empty name.
    pub fn register(self) -> Result<Arc<Counter>> {
        let (spec, registry) = self.into_spec(None);
        registry.register_spec(spec)
    }

    /// Registers a timer counter.
    pub fn register_timer(self) -> Result<TimerCounter> {
        let threshold = self.threshold;
        let (spec, registry) = self.into_spec(Some(threshold));
        let counter = registry.register_spec(spec)?;
        Ok(TimerCounter::from_counter(counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::Reading;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        updates: AtomicUsize,
        status_calls: AtomicUsize,
        accept: Option<&'static str>,
    }

    impl Probe {
        fn accepting_all() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn accepting_only(category: &'static str) -> Arc<Self> {
            Arc::new(Self {
                accept: Some(category),
                ..Self::default()
            })
        }
    }

    impl Consumer for Probe {
        fn supports_counter(&self, counter: &Counter) -> bool {
            self.accept.map_or(true, |c| counter.category() == c)
        }
        fn on_update(&self, _counter: &Counter, _reading: &Reading) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        fn on_status(&self, _counter: &Counter, _enabled: bool) {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let registry = CounterRegistry::new();
        assert!(matches!(
            registry.create_counter(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_default_category_is_global() {
        let registry = CounterRegistry::new();
        let counter = registry.create_counter("loose").unwrap();
        assert_eq!(counter.category(), DEFAULT_CATEGORY);
        assert!(registry.get_category(DEFAULT_CATEGORY).is_some());
    }

    #[test]
    fn test_get_counter_never_fails() {
        let registry = CounterRegistry::new();
        let counter = registry.get_counter("unseen");
        assert_eq!(counter.category(), DEFAULT_CATEGORY);
        assert!(!counter.is_disposed());

        let again = registry.get_counter("unseen");
        assert!(Arc::ptr_eq(&counter, &again));
    }

    #[test]
    fn test_same_name_supersedes_old_counter() {
        let registry = CounterRegistry::new();
        let probe = Probe::accepting_all();
        registry.register_consumer(probe.clone());

        let old = registry.create_counter("flaky").unwrap();
        old.inc();
        let delivered_before = probe.updates.load(Ordering::SeqCst);

        let new = registry.create_counter("flaky").unwrap();
        assert!(old.is_disposed());
        assert!(!new.is_disposed());

        // The prior instance stays valid but goes silent.
        old.inc();
        assert_eq!(old.total(), 2);
        assert_eq!(probe.updates.load(Ordering::SeqCst), delivered_before);

        new.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), delivered_before + 1);

        // Only the live instance is visible.
        let counters = registry.get_counters();
        assert_eq!(counters.len(), 1);
        assert!(Arc::ptr_eq(&counters[0], &new));
    }

    #[test]
    fn test_replacement_releases_the_old_id() {
        let registry = CounterRegistry::new();
        registry.counter("c").id("first").register().unwrap();
        registry.counter("c").register().unwrap();

        assert!(matches!(
            registry.get_counter_by_id("first"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_id_lookup() {
        let registry = CounterRegistry::new();
        let counter = registry.counter("jobs").id("job-counter").register().unwrap();
        let found = registry.get_counter_by_id("job-counter").unwrap();
        assert!(Arc::ptr_eq(&counter, &found));
        assert!(matches!(
            registry.get_counter_by_id("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_consumer_attaches_retroactively_by_capability() {
        let registry = CounterRegistry::new();
        let build_counter = registry
            .counter("compile")
            .category("Build")
            .register()
            .unwrap();
        let other_counter = registry.create_counter("misc").unwrap();

        let probe = Probe::accepting_only("Build");
        registry.register_consumer(probe.clone());

        build_counter.inc();
        other_counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_stranger_is_noop() {
        let registry = CounterRegistry::new();
        registry.create_counter("steady").unwrap();
        let stranger: Arc<dyn Consumer> = Probe::accepting_all();
        registry.unregister_consumer(&stranger);
        assert_eq!(registry.get_counters().len(), 1);
    }

    #[test]
    fn test_double_registration_doubles_dispatch() {
        let registry = CounterRegistry::new();
        let counter = registry.create_counter("eager").unwrap();
        let probe = Probe::accepting_all();
        let consumer: Arc<dyn Consumer> = probe.clone();

        registry.register_consumer(consumer.clone());
        registry.register_consumer(consumer.clone());
        counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 2);

        // One unregistration removes one dispatch.
        registry.unregister_consumer(&consumer);
        counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_set_enabled_suppresses_dispatch_and_refreshes_status() {
        let registry = CounterRegistry::new();
        let counter = registry.create_counter("gated").unwrap();
        let probe = Probe::accepting_all();
        registry.register_consumer(probe.clone());
        let status_before = probe.status_calls.load(Ordering::SeqCst);

        registry.set_enabled(false);
        assert!(!registry.is_enabled());
        assert!(probe.status_calls.load(Ordering::SeqCst) > status_before);

        counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 0);
        assert_eq!(counter.total(), 1, "totals advance while disabled");

        registry.set_enabled(true);
        counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_build_compile_scenario() {
        let registry = CounterRegistry::new();
        let compile = registry
            .counter("Compile")
            .category("Build")
            .register()
            .unwrap();
        compile.inc();
        compile.inc();
        compile.inc();

        let counters = registry.get_counters();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].name(), "Compile");
        assert_eq!(counters[0].value(), 3);
        assert_eq!(counters[0].total(), 3);
        assert_eq!(counters[0].category(), "Build");

        let build = registry.get_category("Build").unwrap();
        assert!(build.find("Compile").is_some());
    }

    #[test]
    fn test_categories_grow_in_creation_order() {
        let registry = CounterRegistry::new();
        registry.counter("a").category("One").register().unwrap();
        registry.counter("b").category("Two").register().unwrap();
        registry.counter("c").category("One").register().unwrap();

        let names: Vec<String> = registry
            .get_categories()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["One", "Two"]);
        assert_eq!(registry.get_category("One").unwrap().len(), 2);
    }

    #[test]
    fn test_timer_registration_roundtrip() {
        let registry = CounterRegistry::new();
        let timer = registry
            .counter("save")
            .category("IO")
            .threshold(Duration::from_millis(1))
            .register_timer()
            .unwrap();
        assert!(timer.is_timer());
        assert_eq!(timer.threshold(), Duration::from_millis(1));

        let fetched = registry.get_counter("save");
        assert!(fetched.as_timer().is_some());
    }

    #[test]
    fn test_shutdown_silences_everything() {
        let registry = CounterRegistry::new();
        let counter = registry.create_counter("done").unwrap();
        let probe = Probe::accepting_all();
        registry.register_consumer(probe.clone());

        registry.shutdown();
        counter.inc();
        assert_eq!(probe.updates.load(Ordering::SeqCst), 0);
        assert_eq!(counter.subscriber_count(), 0);
    }
}
