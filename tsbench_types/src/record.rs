use std::sync::Arc;

use chrono::DateTime;

/// The first timestamp handed out to a generated record, in epoch milliseconds
pub const START_TIMESTAMP_MS: i64 = 1_500_000_000_000;

/// Layout used wherever a timestamp is rendered as text (SQL literals, CSV rows)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One synthetic sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticRecord {
    /// Milliseconds since the epoch
    pub timestamp_ms: i64,
    pub current: f64,
    pub voltage: i32,
    pub phase: f64,
}

impl SyntheticRecord {
    /// The timestamp rendered with [`TIMESTAMP_FORMAT`] in UTC
    pub fn timestamp_text(&self) -> String {
        format_timestamp(self.timestamp_ms)
    }

    /// The CSV columns `timestamp,current,voltage,phase`, floats with seven fraction digits
    pub fn csv_fields(&self) -> [String; 4] {
        [
            self.timestamp_text(),
            format!("{:.7}", self.current),
            self.voltage.to_string(),
            format!("{:.7}", self.phase),
        ]
    }

    /// The record as a CSV row without a trailing newline
    pub fn csv_row(&self) -> String {
        self.csv_fields().join(",")
    }
}

/// Render epoch milliseconds with [`TIMESTAMP_FORMAT`]
///
/// The text is always UTC, whatever the host time zone, so the second generated record reads
/// `2017-07-14 02:40:00.001`, the default point lookup condition. Values outside of the range
/// chrono can represent fall back to the raw number.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(t) => t.format(TIMESTAMP_FORMAT).to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// The records a batch writes into a single destination table
///
/// `records` is either empty, for targets that only need the shape of the batch, or holds
/// exactly `rows` records.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub table: Arc<str>,
    pub rows: usize,
    pub records: Vec<SyntheticRecord>,
}

/// One group of records sent in a single write call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub segments: Vec<Segment>,
}

impl Batch {
    pub fn record_count(&self) -> usize {
        self.segments.iter().map(|s| s.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}
