//! Point-in-time views of a registry and their serialized forms.
//!
//! [`Snapshot`] is the single boundary through which both the persistence
//! loop and the remote endpoint obtain a consistent view: it stamps the
//! registry epoch and the capture time and copies the live *collections*
//! (so concurrent creates cannot corrupt iteration) while sharing the
//! counters themselves by reference. Values are read at serialization
//! time, not capture time.
//!
//! Two serialization adapters exist:
//!
//! - **binary** (`bincode`): full fidelity, reload-capable; the round trip
//!   preserves counter names, ids, categories, count/total and timer stats.
//! - **JSON** (`serde_json`): best-effort external format. Null and
//!   zero-valued fields are omitted and the counter/category reference
//!   cycle is broken by storing category names; explicitly not
//!   round-trippable.
//!
//! [`SnapshotData`] is the deserialized form that a reload or a remote
//! query hands back.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::counters::{Counter, CounterCategory, TimerStats};
use crate::error::{Error, Result};

/// An immutable, timestamped view of all counters and categories.
#[derive(Debug, Clone)]
pub struct Snapshot {
    start_time: SystemTime,
    end_time: SystemTime,
    counters: Vec<Arc<Counter>>,
    categories: Vec<Arc<CounterCategory>>,
}

impl Snapshot {
    pub(crate) fn new(
        start_time: SystemTime,
        end_time: SystemTime,
        counters: Vec<Arc<Counter>>,
        categories: Vec<Arc<CounterCategory>>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            counters,
            categories,
        }
    }

    /// The registry epoch.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When this snapshot was captured.
    pub fn end_time(&self) -> SystemTime {
        self.end_time
    }

    /// The captured counter set.
    pub fn counters(&self) -> &[Arc<Counter>] {
        &self.counters
    }

    /// The captured category set.
    pub fn categories(&self) -> &[Arc<CounterCategory>] {
        &self.categories
    }

    /// Looks up a captured counter by name.
    pub fn get_counter(&self, name: &str) -> Option<&Arc<Counter>> {
        self.counters.iter().find(|c| c.name() == name)
    }

    /// Looks up a captured category by name.
    pub fn get_category(&self, name: &str) -> Option<&Arc<CounterCategory>> {
        self.categories.iter().find(|c| c.name() == name)
    }

    /// Deep-copies the current counter values into a serializable form.
    pub fn to_data(&self) -> SnapshotData {
        SnapshotData {
            start_time: self.start_time,
            end_time: self.end_time,
            counters: self
                .counters
                .iter()
                .map(|c| CounterData::from_counter(c))
                .collect(),
            categories: self
                .categories
                .iter()
                .map(|category| CategoryData {
                    name: category.name().to_string(),
                    counters: category
                        .counters()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect(),
                })
                .collect(),
        }
    }

    /// Serializes with the full-fidelity binary adapter.
    pub fn write_binary<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, &self.to_data())?;
        Ok(())
    }

    /// Serializes with the lossy JSON adapter.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&JsonSnapshot::from(&self.to_data()))?)
    }

    /// Like [`to_json`](Self::to_json), pretty-printed.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&JsonSnapshot::from(
            &self.to_data(),
        ))?)
    }
}

/// Serialized snapshot: what the binary adapter writes and reads, and what
/// remote queries return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    /// The registry epoch.
    pub start_time: SystemTime,
    /// Capture time.
    pub end_time: SystemTime,
    /// All live counters at capture time.
    pub counters: Vec<CounterData>,
    /// All categories at capture time, referencing counters by name.
    pub categories: Vec<CategoryData>,
}

impl SnapshotData {
    /// Deserializes the binary adapter's output. Any malformed or
    /// truncated input is a hard [`Error::SnapshotLoad`].
    pub fn read_binary<R: Read>(reader: R) -> Result<Self> {
        bincode::deserialize_from(reader).map_err(|e| Error::SnapshotLoad(e.to_string()))
    }

    /// Looks up a counter by name.
    pub fn get_counter(&self, name: &str) -> Option<&CounterData> {
        self.counters.iter().find(|c| c.name == name)
    }

    /// Looks up a category by name.
    pub fn get_category(&self, name: &str) -> Option<&CategoryData> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Serialized state of one counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterData {
    pub name: String,
    pub id: Option<String>,
    pub category: String,
    pub count: i64,
    pub total_count: i64,
    pub disposed: bool,
    /// Present for timer counters.
    pub timer: Option<TimerStats>,
}

impl CounterData {
    pub(crate) fn from_counter(counter: &Counter) -> Self {
        Self {
            name: counter.name().to_string(),
            id: counter.id().map(str::to_string),
            category: counter.category().to_string(),
            count: counter.value(),
            total_count: counter.total(),
            disposed: counter.is_disposed(),
            timer: counter.timer_stats(),
        }
    }
}

/// Serialized state of one category; the counter/category cycle is broken
/// by storing member names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryData {
    pub name: String,
    pub counters: Vec<String>,
}

// ---------------------------------------------------------------------------
// Lossy JSON adapter

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Serialize)]
struct JsonSnapshot {
    start_time_ms: u64,
    end_time_ms: u64,
    counters: Vec<JsonCounter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    categories: Vec<CategoryData>,
}

#[derive(Debug, Serialize)]
struct JsonCounter {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    category: String,
    #[serde(skip_serializing_if = "is_zero")]
    count: i64,
    #[serde(skip_serializing_if = "is_zero")]
    total_count: i64,
    #[serde(skip_serializing_if = "is_false")]
    disposed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<JsonTimer>,
}

#[derive(Debug, Serialize)]
struct JsonTimer {
    samples: u64,
    total_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_seconds: Option<f64>,
    max_seconds: f64,
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

impl From<&SnapshotData> for JsonSnapshot {
    fn from(data: &SnapshotData) -> Self {
        Self {
            start_time_ms: millis_since_epoch(data.start_time),
            end_time_ms: millis_since_epoch(data.end_time),
            counters: data
                .counters
                .iter()
                .map(|c| JsonCounter {
                    name: c.name.clone(),
                    id: c.id.clone(),
                    category: c.category.clone(),
                    count: c.count,
                    total_count: c.total_count,
                    disposed: c.disposed,
                    timer: c.timer.as_ref().map(|t| JsonTimer {
                        samples: t.samples,
                        total_seconds: t.total_time.as_secs_f64(),
                        min_seconds: t.min_time.map(|d| d.as_secs_f64()),
                        max_seconds: t.max_time.as_secs_f64(),
                    }),
                })
                .collect(),
            categories: data.categories.clone(),
        }
    }
}
