//! Event recording for simulation runs.
//!
//! A `tracing` subscriber that turns every event into a row of a table named
//! after the event's target (`"scheduler"`, `"facility_run"`, `"decision"`,
//! ...). Columns are created the first time a field name is seen and padded
//! with defaults where an event leaves them out.
//!
//! ```ignore
//! let (_, recorder) = instrument::capture(|| world.tick(1000));
//! let runs = recorder.table("facility_run").unwrap();
//! let factors = runs.f64s("factor").unwrap();
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Metadata, Subscriber};

/// One column of recorded values.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::U64(v) => v.len(),
            Values::I64(v) => v.len(),
            Values::F64(v) => v.len(),
            Values::Bool(v) => v.len(),
            Values::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        match self {
            Values::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Values::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Values::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            Values::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            Values::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }
}

/// Rows recorded under one target.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    columns: BTreeMap<String, Values>,
    rows: usize,
}

impl EventTable {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&Values> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn f64s(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            Values::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn u64s(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name)? {
            Values::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn strs(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            Values::Str(v) => Some(v),
            _ => None,
        }
    }

    fn finish_row(&mut self) {
        self.rows += 1;
        for values in self.columns.values_mut() {
            values.pad_to(self.rows);
        }
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| match values {
                Values::U64(v) => Column::new(name.into(), v),
                Values::I64(v) => Column::new(name.into(), v),
                Values::F64(v) => Column::new(name.into(), v),
                Values::Bool(v) => Column::new(name.into(), v),
                Values::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// Every table recorded on this thread, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: BTreeMap<String, EventTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&EventTable> {
        self.tables.get(target)
    }

    /// Row count for a target, zero if nothing was recorded.
    pub fn rows(&self, target: &str) -> usize {
        self.tables.get(target).map_or(0, EventTable::rows)
    }

    pub fn to_dataframes(&self) -> BTreeMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }

    /// Write each table to `{dir}/{target}.parquet`.
    pub fn write_parquet(&self, dir: &Path) -> PolarsResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| PolarsError::IO {
            error: e.into(),
            msg: None,
        })?;
        for (name, mut df) in self.to_dataframes() {
            let path = dir.join(format!("{name}.parquet"));
            let file = std::fs::File::create(&path).map_err(|e| PolarsError::IO {
                error: e.into(),
                msg: None,
            })?;
            ParquetWriter::new(file).finish(&mut df)?;
        }
        Ok(())
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

struct RowVisitor<'a> {
    table: &'a mut EventTable,
}

impl RowVisitor<'_> {
    fn slot(&mut self, field: &Field, empty: impl FnOnce(usize) -> Values) -> &mut Values {
        let rows = self.table.rows;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| empty(rows))
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let Values::U64(v) = self.slot(field, |n| Values::U64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let Values::I64(v) = self.slot(field, |n| Values::I64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Values::F64(v) = self.slot(field, |n| Values::F64(vec![0.0; n])) {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let Values::Bool(v) = self.slot(field, |n| Values::Bool(vec![false; n])) {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let Values::Str(v) = self.slot(field, |n| Values::Str(vec![String::new(); n])) {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Subscriber that appends events at or above `level` to the thread's
/// recorder. Spans are ignored.
pub struct EventCollector {
    level: Level,
}

impl EventCollector {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl Subscriber for EventCollector {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= self.level
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();
            event.record(&mut RowVisitor { table: &mut *table });
            table.finish_row();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install a debug-level collector as the global default. Later calls are
/// ignored.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(EventCollector::default());
}

/// Take everything recorded on this thread so far.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

/// Run `f` with a collector installed for this thread only and return its
/// result along with the events it emitted.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Recorder) {
    clear();
    let out = tracing::subscriber::with_default(EventCollector::default(), f);
    (out, drain())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_grouped_by_target() {
        let (_, recorder) = capture(|| {
            tracing::info!(target: "facility_run", facility = 1u64, factor = 0.5f64);
            tracing::info!(target: "facility_run", facility = 2u64, factor = 0.25f64);
            tracing::debug!(target: "scheduler", facilities = 2u64);
        });
        assert_eq!(recorder.rows("facility_run"), 2);
        assert_eq!(recorder.rows("scheduler"), 1);
        assert_eq!(recorder.rows("decision"), 0);
        let runs = recorder.table("facility_run").unwrap();
        assert_eq!(runs.f64s("factor"), Some(&[0.5, 0.25][..]));
        assert_eq!(runs.u64s("facility"), Some(&[1, 2][..]));
    }

    #[test]
    fn test_late_and_missing_fields_are_padded() {
        let (_, recorder) = capture(|| {
            tracing::info!(target: "decision", action = "sell", amount = 4.0f64);
            tracing::info!(target: "decision", action = "invest", area = 2.0f64);
        });
        let table = recorder.table("decision").unwrap();
        assert_eq!(table.rows(), 2);
        assert_eq!(table.f64s("amount"), Some(&[4.0, 0.0][..]));
        assert_eq!(table.f64s("area"), Some(&[0.0, 2.0][..]));
        let actions: Vec<&str> = table.strs("action").unwrap().iter().map(String::as_str).collect();
        assert_eq!(actions, ["sell", "invest"]);
        assert_eq!(table.column_names().collect::<Vec<_>>(), ["action", "amount", "area"]);
    }

    #[test]
    fn test_level_filter() {
        clear();
        tracing::subscriber::with_default(EventCollector::new(Level::INFO), || {
            tracing::debug!(target: "loot", amount = 1.0f64);
            tracing::info!(target: "build", area = 1.0f64);
        });
        let recorder = drain();
        assert_eq!(recorder.rows("loot"), 0);
        assert_eq!(recorder.rows("build"), 1);
    }

    #[test]
    fn test_dataframe_shape() {
        let (_, recorder) = capture(|| {
            for i in 0..3u64 {
                tracing::info!(target: "perish", step = i, perished = i as f64 * 0.5);
            }
        });
        let dfs = recorder.to_dataframes();
        let df = &dfs["perish"];
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn test_write_parquet_per_target() {
        let (_, recorder) = capture(|| {
            tracing::info!(target: "build", facility = 3u64, area = 2.0f64);
        });
        let dir = std::env::temp_dir().join(format!("instrument-{}", std::process::id()));
        recorder.write_parquet(&dir).unwrap();
        assert!(dir.join("build.parquet").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
