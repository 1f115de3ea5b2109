//! Core data types for chartfeed
//!
//! This module contains the sample model that flows through the pipeline.
//!
//! # Main Types
//!
//! - [`Sample`] - One timestamped point tagged with a series id and a transport sequence number
//! - [`Payload`] - The value carried by a sample (scalar, tick, bar or marker)
//! - [`SeriesCategory`] - Buffer sizing/layout class derived from the payload
//! - [`TimeRange`] - A visible time window in data milliseconds
//!
//! # Column Layout
//!
//! Buffers store payloads as parallel `f64` columns next to the time column.
//! The layout is fixed per category:
//!
//! | Category    | Columns                    |
//! |-------------|----------------------------|
//! | `Tick`      | price, volume (NaN if none)|
//! | `Indicator` | value                      |
//! | `Bar`       | open, high, low, close     |
//! | `Marker`    | direction code             |

use serde::{Deserialize, Serialize};
use std::fmt;

/// A batch of samples as delivered by the decoder. One batch is one queue entry.
pub type SampleBatch = Vec<Sample>;

/// Direction attached to a marker payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarkerDirection {
    Up,
    Down,
    #[default]
    Neutral,
}

impl MarkerDirection {
    /// Numeric code stored in the marker buffer column
    pub fn code(&self) -> f64 {
        match self {
            MarkerDirection::Up => 1.0,
            MarkerDirection::Down => -1.0,
            MarkerDirection::Neutral => 0.0,
        }
    }

    /// Inverse of [`MarkerDirection::code`]
    pub fn from_code(code: f64) -> Self {
        if code > 0.0 {
            MarkerDirection::Up
        } else if code < 0.0 {
            MarkerDirection::Down
        } else {
            MarkerDirection::Neutral
        }
    }
}

/// The value carried by a [`Sample`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Plain scalar (indicator output, gauge reading)
    Scalar { value: f64 },
    /// Trade/quote tick
    Tick { price: f64, volume: Option<f64> },
    /// OHLC bar
    Bar {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    /// Discrete annotation (signal, fill, alert)
    Marker {
        kind: String,
        tag: String,
        direction: MarkerDirection,
    },
}

impl Payload {
    /// Category this payload is buffered under
    pub fn category(&self) -> SeriesCategory {
        match self {
            Payload::Scalar { .. } => SeriesCategory::Indicator,
            Payload::Tick { .. } => SeriesCategory::Tick,
            Payload::Bar { .. } => SeriesCategory::Bar,
            Payload::Marker { .. } => SeriesCategory::Marker,
        }
    }

    /// Append this payload's numeric columns, one value per column.
    ///
    /// `columns` must have exactly `self.category().column_count()` entries.
    pub fn push_columns(&self, columns: &mut [Vec<f64>]) {
        match self {
            Payload::Scalar { value } => columns[0].push(*value),
            Payload::Tick { price, volume } => {
                columns[0].push(*price);
                columns[1].push(volume.unwrap_or(f64::NAN));
            }
            Payload::Bar {
                open,
                high,
                low,
                close,
            } => {
                columns[0].push(*open);
                columns[1].push(*high);
                columns[2].push(*low);
                columns[3].push(*close);
            }
            Payload::Marker { direction, .. } => columns[0].push(direction.code()),
        }
    }

    /// Label stored alongside marker points (`kind:tag`)
    pub fn label(&self) -> Option<String> {
        match self {
            Payload::Marker { kind, tag, .. } => Some(format!("{}:{}", kind, tag)),
            _ => None,
        }
    }
}

/// A single timestamped data point tagged with a series identifier and a
/// transport sequence number. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Transport sequence number (monotonic per connection stream)
    pub sequence: u64,
    /// Series this point belongs to (e.g. `AAPL:ticks`)
    pub series_id: String,
    /// Data time in milliseconds
    pub timestamp_ms: u64,
    /// Carried value
    pub payload: Payload,
}

impl Sample {
    /// Create a new sample
    pub fn new(
        sequence: u64,
        series_id: impl Into<String>,
        timestamp_ms: u64,
        payload: Payload,
    ) -> Self {
        Self {
            sequence,
            series_id: series_id.into(),
            timestamp_ms,
            payload,
        }
    }

    /// Convenience constructor for a scalar sample
    pub fn scalar(sequence: u64, series_id: impl Into<String>, timestamp_ms: u64, value: f64) -> Self {
        Self::new(sequence, series_id, timestamp_ms, Payload::Scalar { value })
    }

    /// Convenience constructor for a tick sample
    pub fn tick(
        sequence: u64,
        series_id: impl Into<String>,
        timestamp_ms: u64,
        price: f64,
        volume: Option<f64>,
    ) -> Self {
        Self::new(sequence, series_id, timestamp_ms, Payload::Tick { price, volume })
    }

    /// Category this sample is buffered under
    pub fn category(&self) -> SeriesCategory {
        self.payload.category()
    }
}

/// Buffer sizing/layout class of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesCategory {
    Tick,
    Indicator,
    Bar,
    Marker,
}

impl SeriesCategory {
    /// Number of value columns stored per point
    pub fn column_count(&self) -> usize {
        match self {
            SeriesCategory::Tick => 2,
            SeriesCategory::Indicator => 1,
            SeriesCategory::Bar => 4,
            SeriesCategory::Marker => 1,
        }
    }

    /// Whether points carry a text label next to their columns
    pub fn has_labels(&self) -> bool {
        matches!(self, SeriesCategory::Marker)
    }

    /// Best guess of category from a column count (used when a series is first
    /// created by a raw `append_range`)
    pub fn from_column_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(SeriesCategory::Indicator),
            2 => Some(SeriesCategory::Tick),
            4 => Some(SeriesCategory::Bar),
            _ => None,
        }
    }
}

impl fmt::Display for SeriesCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesCategory::Tick => write!(f, "tick"),
            SeriesCategory::Indicator => write!(f, "indicator"),
            SeriesCategory::Bar => write!(f, "bar"),
            SeriesCategory::Marker => write!(f, "marker"),
        }
    }
}

/// Visible time window in data milliseconds. `start_ms` may be clamped to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start_ms: f64,
    pub end_ms: f64,
}

impl TimeRange {
    pub fn new(start_ms: f64, end_ms: f64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Width of the range in milliseconds
    pub fn width_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }

    /// Whether a data timestamp falls inside the range
    pub fn contains(&self, timestamp_ms: u64) -> bool {
        let t = timestamp_ms as f64;
        t >= self.start_ms && t <= self.end_ms
    }
}
