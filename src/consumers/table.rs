//! Table renderer for pretty-printing snapshot data.
//!
//! This module provides [`TableRenderer`], which renders the counters of a
//! [`SnapshotData`] as a formatted ASCII table using the `tabled` crate.
//!
//! # Feature Flag
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! telemetria = { version = "0.1", features = ["table"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use telemetria::consumers::table::{TableRenderer, TableStyle};
//! use telemetria::registry::CounterRegistry;
//!
//! let registry = CounterRegistry::new();
//! registry.get_counter("Requests").add(1000);
//! registry.get_counter("Errors").add(5);
//!
//! let renderer = TableRenderer::new().with_style(TableStyle::Rounded);
//! println!("{}", renderer.render(&registry.snapshot().to_data()));
//! // ╭──────────┬──────────┬───────┬───────╮
//! // │ Name     │ Category │ Value │ Total │
//! // ├──────────┼──────────┼───────┼───────┤
//! // │ Requests │ Global   │ 1000  │ 1000  │
//! // │ Errors   │ Global   │ 5     │ 5     │
//! // ╰──────────┴──────────┴───────┴───────╯
//! ```

use tabled::{settings::Style, Table, Tabled};

use crate::snapshot::{CounterData, SnapshotData};

/// Available table styles for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// Modern style with clean lines
    Modern,
    /// GitHub-flavored Markdown table
    Markdown,
    /// No borders, just spacing
    Blank,
}

/// Internal row representation for tabled.
#[derive(Tabled)]
struct CounterRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Timing")]
    timing: String,
}

impl CounterRow {
    fn from_data(counter: &CounterData) -> Self {
        let timing = match &counter.timer {
            Some(stats) if stats.samples > 0 => format!(
                "{} samples / {:.3}s",
                stats.samples,
                stats.total_time.as_secs_f64()
            ),
            Some(_) => "0 samples".to_string(),
            None => String::new(),
        };
        Self {
            name: counter.name.clone(),
            category: counter.category.clone(),
            value: counter.count.to_string(),
            total: counter.total_count.to_string(),
            timing,
        }
    }
}

/// Renders snapshot counters as a formatted ASCII table.
#[derive(Debug, Clone, Default)]
pub struct TableRenderer {
    style: TableStyle,
    show_header: bool,
    skip_zero: bool,
    title: Option<String>,
}

impl TableRenderer {
    /// Creates a renderer with the default rounded style and headers on.
    pub fn new() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            skip_zero: false,
            title: None,
        }
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets whether to show the header row.
    pub fn with_header(mut self, show: bool) -> Self {
        self.show_header = show;
        self
    }

    /// Skips counters whose value and total are both zero.
    pub fn skip_zero(mut self, skip: bool) -> Self {
        self.skip_zero = skip;
        self
    }

    /// Sets an optional title printed above the table.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Renders the snapshot's counters, in registry order.
    pub fn render(&self, data: &SnapshotData) -> String {
        let rows: Vec<CounterRow> = data
            .counters
            .iter()
            .filter(|c| !self.skip_zero || c.count != 0 || c.total_count != 0)
            .map(CounterRow::from_data)
            .collect();

        let mut table = Table::new(&rows);
        self.apply_style(&mut table);

        if !self.show_header {
            table.with(tabled::settings::Remove::row(
                tabled::settings::object::Rows::first(),
            ));
        }

        match &self.title {
            Some(title) => format!("{}\n{}", title, table),
            None => table.to_string(),
        }
    }

    fn apply_style(&self, table: &mut Table) {
        match self.style {
            TableStyle::Ascii => {
                table.with(Style::ascii());
            }
            TableStyle::Rounded => {
                table.with(Style::rounded());
            }
            TableStyle::Sharp => {
                table.with(Style::sharp());
            }
            TableStyle::Modern => {
                table.with(Style::modern());
            }
            TableStyle::Markdown => {
                table.with(Style::markdown());
            }
            TableStyle::Blank => {
                table.with(Style::blank());
            }
        }
    }
}
