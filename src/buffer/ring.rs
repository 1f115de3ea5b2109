//! Fixed-capacity columnar ring buffer for one series

use crate::error::{FeedError, Result};
use crate::types::SeriesCategory;

/// Chronological copy of a buffer's contents
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesSnapshot {
    pub times: Vec<u64>,
    /// One vector per column, each `times.len()` long
    pub columns: Vec<Vec<f64>>,
    /// Marker labels, parallel to `times` (marker series only)
    pub labels: Option<Vec<String>>,
}

impl SeriesSnapshot {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Ring buffer of timestamped points with parallel value columns.
///
/// Storage grows up to `capacity` and then wraps: each further point
/// overwrites the oldest one, so an append of `k` points into a full buffer
/// costs O(k) and evicts exactly `k` points.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    category: SeriesCategory,
    capacity: usize,
    times: Vec<u64>,
    columns: Vec<Vec<f64>>,
    labels: Option<Vec<String>>,
    /// Physical index of the oldest point once the storage has wrapped
    head: usize,
    last_timestamp_ms: u64,
    dirty: bool,
}

impl SeriesBuffer {
    /// Create an empty buffer. A zero capacity is bumped to 1.
    pub fn new(category: SeriesCategory, capacity: usize) -> Self {
        Self {
            category,
            capacity: capacity.max(1),
            times: Vec::new(),
            columns: vec![Vec::new(); category.column_count()],
            labels: category.has_labels().then(Vec::new),
            head: 0,
            last_timestamp_ms: 0,
            dirty: false,
        }
    }

    pub fn category(&self) -> SeriesCategory {
        self.category
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn last_timestamp_ms(&self) -> u64 {
        self.last_timestamp_ms
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Append a batch of points.
    ///
    /// Every argument is validated before anything is written, so a failed
    /// call leaves the buffer untouched. When the batch is larger than the
    /// capacity only its last `capacity` points are kept.
    pub fn append(&mut self, times: &[u64], values: &[&[f64]], labels: Option<&[String]>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(FeedError::InvalidArgument(format!(
                "{} series expects {} value column(s), got {}",
                self.category,
                self.columns.len(),
                values.len()
            )));
        }
        if let Some(bad) = values.iter().position(|col| col.len() != times.len()) {
            return Err(FeedError::InvalidArgument(format!(
                "value column {} has {} entries for {} timestamps",
                bad,
                values[bad].len(),
                times.len()
            )));
        }
        match (&self.labels, labels) {
            (Some(_), Some(l)) if l.len() != times.len() => {
                return Err(FeedError::InvalidArgument(format!(
                    "{} labels for {} timestamps",
                    l.len(),
                    times.len()
                )));
            }
            (None, Some(_)) => {
                return Err(FeedError::InvalidArgument(format!(
                    "{} series does not carry labels",
                    self.category
                )));
            }
            _ => {}
        }

        if times.is_empty() {
            return Ok(());
        }

        let skip = times.len().saturating_sub(self.capacity);
        for i in skip..times.len() {
            self.write_point(i, times, values, labels);
        }
        self.last_timestamp_ms = times[times.len() - 1];
        self.dirty = true;
        Ok(())
    }

    fn write_point(&mut self, i: usize, times: &[u64], values: &[&[f64]], labels: Option<&[String]>) {
        let label = || labels.map(|l| l[i].clone()).unwrap_or_default();

        if self.times.len() < self.capacity {
            self.times.push(times[i]);
            for (column, src) in self.columns.iter_mut().zip(values) {
                column.push(src[i]);
            }
            if let Some(stored) = self.labels.as_mut() {
                stored.push(label());
            }
        } else {
            let slot = self.head;
            self.times[slot] = times[i];
            for (column, src) in self.columns.iter_mut().zip(values) {
                column[slot] = src[i];
            }
            if let Some(stored) = self.labels.as_mut() {
                stored[slot] = label();
            }
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Reset to empty, keeping the allocation
    pub fn clear(&mut self) {
        self.times.clear();
        for column in &mut self.columns {
            column.clear();
        }
        if let Some(labels) = self.labels.as_mut() {
            labels.clear();
        }
        self.head = 0;
        self.last_timestamp_ms = 0;
        self.dirty = true;
    }

    fn physical(&self, logical: usize) -> usize {
        if self.times.len() < self.capacity {
            logical
        } else {
            (self.head + logical) % self.capacity
        }
    }

    /// Timestamp of the `index`-th oldest point
    pub fn time_at(&self, index: usize) -> Option<u64> {
        (index < self.len()).then(|| self.times[self.physical(index)])
    }

    /// Value of `column` for the `index`-th oldest point
    pub fn value_at(&self, column: usize, index: usize) -> Option<f64> {
        let col = self.columns.get(column)?;
        (index < self.len()).then(|| col[self.physical(index)])
    }

    /// Label of the `index`-th oldest point
    pub fn label_at(&self, index: usize) -> Option<&str> {
        let labels = self.labels.as_ref()?;
        (index < self.len()).then(|| labels[self.physical(index)].as_str())
    }

    /// Timestamps, oldest first
    pub fn iter_times(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.times[self.physical(i)])
    }

    /// Values of one column, oldest first (empty for an unknown column)
    pub fn iter_column(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        let col: &[f64] = self.columns.get(column).map_or(&[], Vec::as_slice);
        (0..col.len()).map(move |i| col[self.physical(i)])
    }

    /// Chronological copy of everything in the buffer
    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            times: self.iter_times().collect(),
            columns: (0..self.columns.len())
                .map(|c| self.iter_column(c).collect())
                .collect(),
            labels: self.labels.as_ref().map(|labels| {
                (0..self.len())
                    .map(|i| labels[self.physical(i)].clone())
                    .collect()
            }),
        }
    }

    /// First and last timestamp
    pub fn time_range(&self) -> Option<(u64, u64)> {
        Some((self.time_at(0)?, self.time_at(self.len().checked_sub(1)?)?))
    }

    /// Min and max of a column, ignoring NaN
    pub fn value_range(&self, column: usize) -> Option<(f64, f64)> {
        self.iter_column(column)
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((min, max)) => Some((min.min(v), max.max(v))),
            })
    }

    /// `[time_ms, value]` pairs for plotting
    pub fn as_plot_points(&self, column: usize) -> Vec<[f64; 2]> {
        self.iter_times()
            .zip(self.iter_column(column))
            .map(|(t, v)| [t as f64, v])
            .collect()
    }
}
