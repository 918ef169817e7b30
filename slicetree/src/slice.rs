//! Slice descriptors and their column store encoding.
//!
//! A slice is a contiguous run of fixed-step datapoints of one archive. Its
//! identity is `(metric, step, start)`; its `end` is one step past the last
//! written point. The slice index row of a metric holds one column per
//! slice, and each slice's points live in their own datapoint partition.

use std::fmt;

/// Width of zero-padded numbers in column names, enough for `u64::MAX`.
const KEY_WIDTH: usize = 20;

/// Boundaries of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
    /// Seconds between points.
    pub step: u64,
    /// Timestamp of the first point.
    pub start: u64,
    /// One step past the last written point (equal to `start` when empty).
    pub end: u64,
}

impl Slice {
    /// Creates an empty slice starting at `start`.
    pub fn new(step: u64, start: u64) -> Self {
        Self {
            step,
            start,
            end: start,
        }
    }

    /// Whether `timestamp` lies inside the written range.
    pub fn contains(&self, timestamp: u64) -> bool {
        (self.start..self.end).contains(&timestamp)
    }

    /// Seconds of missing data between the slice end and `timestamp`.
    pub fn gap_to(&self, timestamp: u64) -> u64 {
        timestamp.saturating_sub(self.end)
    }

    /// Grows the slice so that it covers `timestamp`.
    pub fn extend_to(&mut self, timestamp: u64) {
        self.end = self.end.max(timestamp.saturating_add(self.step));
    }

    /// Number of point positions between start and end.
    pub fn len(&self) -> u64 {
        (self.end - self.start) / self.step
    }

    /// Whether no point has been written.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Column name of this slice in the slice index row.
    pub fn index_column(&self) -> String {
        format!("{:0w$}:{:0w$}", self.step, self.start, w = KEY_WIDTH)
    }

    /// Parses an index column name into `(step, start)`.
    pub fn parse_index_column(name: &str) -> Option<(u64, u64)> {
        let (step, start) = name.split_once(':')?;
        Some((step.parse().ok()?, start.parse().ok()?))
    }

    /// Index column bounds `[start, end)` covering every slice of `step`.
    pub fn index_range(step: u64) -> (String, String) {
        // ';' is the character after ':' so the range ends right after
        // the last column with this step prefix.
        (
            format!("{step:0w$}:", w = KEY_WIDTH),
            format!("{step:0w$};", w = KEY_WIDTH),
        )
    }

    /// Partition key of this slice's datapoints.
    pub fn data_partition(&self, metric: &str) -> String {
        format!("{metric}:{}:{}", self.step, self.start)
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) step {}", self.start, self.end, self.step)
    }
}

/// Column name of a datapoint.
pub fn timestamp_column(timestamp: u64) -> String {
    format!("{timestamp:0w$}", w = KEY_WIDTH)
}

/// Parses a datapoint column name.
pub fn parse_timestamp_column(name: &str) -> Option<u64> {
    name.parse().ok()
}

/// Encodes a datapoint value.
pub fn encode_value(value: f64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decodes a datapoint value.
pub fn decode_value(bytes: &[u8]) -> Option<f64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(f64::from_be_bytes(raw))
}

/// Aligns `timestamp` down to a multiple of `step`.
pub fn align_down(timestamp: u64, step: u64) -> u64 {
    timestamp - timestamp % step
}

/// Aligns `timestamp` up to a multiple of `step`.
pub fn align_up(timestamp: u64, step: u64) -> u64 {
    match timestamp % step {
        0 => timestamp,
        rem => timestamp.saturating_add(step - rem),
    }
}
