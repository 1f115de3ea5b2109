//! Registry of per-series ring buffers
//!
//! The store is shared through an `Arc`. The drain loop is the only writer;
//! renderers read concurrently. Each series sits behind its own
//! `parking_lot::RwLock`, and a whole batch is written under one write guard,
//! so a reader sees a series either before or after a batch, never halfway.

use super::ring::{SeriesBuffer, SeriesSnapshot};
use crate::config::CategoryCapacities;
use crate::error::{FeedError, Result, ResultExt};
use crate::types::{Sample, SeriesCategory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-series statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesStats {
    pub count: usize,
    pub last_timestamp_ms: u64,
    pub capacity: usize,
    pub category: SeriesCategory,
    pub dirty: bool,
}

/// Stable handle to one series buffer.
///
/// Handles stay valid for the life of the store; routing changes never
/// recreate a buffer.
#[derive(Clone)]
pub struct SeriesHandle {
    id: Arc<str>,
    buffer: Arc<RwLock<SeriesBuffer>>,
}

impl std::fmt::Debug for SeriesHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesHandle")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

impl SeriesHandle {
    fn new(id: &str, buffer: SeriesBuffer) -> Self {
        Self {
            id: Arc::from(id),
            buffer: Arc::new(RwLock::new(buffer)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether two handles point at the same buffer
    pub fn same_buffer(&self, other: &SeriesHandle) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Run `f` against a consistent view of the buffer
    pub fn read<R>(&self, f: impl FnOnce(&SeriesBuffer) -> R) -> R {
        f(&self.buffer.read())
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.read().capacity()
    }

    pub fn category(&self) -> SeriesCategory {
        self.buffer.read().category()
    }

    pub fn last_timestamp_ms(&self) -> u64 {
        self.buffer.read().last_timestamp_ms()
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.read().is_dirty()
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        self.buffer.read().snapshot()
    }

    pub fn time_range(&self) -> Option<(u64, u64)> {
        self.buffer.read().time_range()
    }

    pub fn value_range(&self, column: usize) -> Option<(f64, f64)> {
        self.buffer.read().value_range(column)
    }

    pub fn as_plot_points(&self, column: usize) -> Vec<[f64; 2]> {
        self.buffer.read().as_plot_points(column)
    }

    pub fn stats(&self) -> SeriesStats {
        let buf = self.buffer.read();
        SeriesStats {
            count: buf.len(),
            last_timestamp_ms: buf.last_timestamp_ms(),
            capacity: buf.capacity(),
            category: buf.category(),
            dirty: buf.is_dirty(),
        }
    }

    fn append(&self, times: &[u64], values: &[&[f64]], labels: Option<&[String]>) -> Result<()> {
        self.buffer
            .write()
            .append(times, values, labels)
            .with_context(|| format!("append to '{}'", self.id))
    }
}

/// Registry of series buffers
#[derive(Debug, Default)]
pub struct SeriesBufferStore {
    series: RwLock<HashMap<String, SeriesHandle>>,
    capacities: CategoryCapacities,
}

impl SeriesBufferStore {
    pub fn new(capacities: CategoryCapacities) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacities,
        }
    }

    /// Shared store
    pub fn shared(capacities: CategoryCapacities) -> Arc<Self> {
        Arc::new(Self::new(capacities))
    }

    pub fn capacities(&self) -> &CategoryCapacities {
        &self.capacities
    }

    /// Handle for `series_id`, creating the buffer on first use.
    ///
    /// `category` only picks the capacity and column layout of a new buffer;
    /// later calls return the existing buffer whatever category they pass.
    pub fn get_or_create(&self, series_id: &str, category: SeriesCategory) -> SeriesHandle {
        if let Some(handle) = self.series.read().get(series_id) {
            return handle.clone();
        }
        let mut series = self.series.write();
        series
            .entry(series_id.to_string())
            .or_insert_with(|| {
                let capacity = self.capacities.for_category(category);
                tracing::debug!(
                    "Created {} buffer '{}' (capacity {})",
                    category,
                    series_id,
                    capacity
                );
                SeriesHandle::new(series_id, SeriesBuffer::new(category, capacity))
            })
            .clone()
    }

    /// Existing handle, if any
    pub fn get(&self, series_id: &str) -> Option<SeriesHandle> {
        self.series.read().get(series_id).cloned()
    }

    pub fn contains(&self, series_id: &str) -> bool {
        self.series.read().contains_key(series_id)
    }

    /// Append a batch to a series atomically.
    ///
    /// A missing series is created with the category implied by the number
    /// of value columns (1 indicator, 2 tick, 4 bar).
    pub fn append_range(&self, series_id: &str, times: &[u64], values: &[&[f64]]) -> Result<()> {
        let handle = match self.get(series_id) {
            Some(handle) => handle,
            None => {
                let category = SeriesCategory::from_column_count(values.len()).ok_or_else(|| {
                    FeedError::InvalidArgument(format!(
                        "cannot infer series category from {} value column(s)",
                        values.len()
                    ))
                })?;
                self.get_or_create(series_id, category)
            }
        };
        handle.append(times, values, None)
    }

    /// Append a batch to a marker series atomically
    pub fn append_labeled_range(
        &self,
        series_id: &str,
        times: &[u64],
        values: &[&[f64]],
        labels: &[String],
    ) -> Result<()> {
        self.get_or_create(series_id, SeriesCategory::Marker)
            .append(times, values, Some(labels))
    }

    /// Append decoded samples that all belong to `series_id`.
    ///
    /// The payload variant of the first sample decides the column layout;
    /// a batch mixing payload kinds is rejected as a whole.
    pub fn append_samples(&self, series_id: &str, samples: &[Sample]) -> Result<()> {
        let Some(first) = samples.first() else {
            return Ok(());
        };
        let category = first.category();
        if let Some(odd) = samples.iter().find(|s| s.category() != category) {
            return Err(FeedError::InvalidArgument(format!(
                "series '{}' mixes {} and {} samples",
                series_id,
                category,
                odd.category()
            )));
        }

        let times: Vec<u64> = samples.iter().map(|s| s.timestamp_ms).collect();
        let mut columns = vec![Vec::with_capacity(samples.len()); category.column_count()];
        for sample in samples {
            sample.payload.push_columns(&mut columns);
        }
        let values: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();

        if category.has_labels() {
            let labels: Vec<String> = samples
                .iter()
                .map(|s| s.payload.label().unwrap_or_default())
                .collect();
            self.append_labeled_range(series_id, &times, &values, &labels)
        } else {
            self.get_or_create(series_id, category)
                .append(&times, &values, None)
        }
    }

    /// Ids of series changed since their last `mark_clean`, sorted
    pub fn dirty_series(&self) -> impl Iterator<Item = String> {
        let mut dirty: Vec<String> = self
            .series
            .read()
            .iter()
            .filter(|(_, handle)| handle.is_dirty())
            .map(|(id, _)| id.clone())
            .collect();
        dirty.sort();
        dirty.into_iter()
    }

    /// Clear the dirty flag. Returns false for an unknown series.
    pub fn mark_clean(&self, series_id: &str) -> bool {
        match self.get(series_id) {
            Some(handle) => {
                handle.buffer.write().mark_clean();
                true
            }
            None => false,
        }
    }

    /// Empty one series, keeping its buffer and capacity
    pub fn clear(&self, series_id: &str) -> bool {
        match self.get(series_id) {
            Some(handle) => {
                handle.buffer.write().clear();
                true
            }
            None => false,
        }
    }

    /// Empty every series, keeping buffers and capacities
    pub fn clear_all(&self) {
        for handle in self.series.read().values() {
            handle.buffer.write().clear();
        }
    }

    pub fn stats(&self, series_id: &str) -> Option<SeriesStats> {
        self.get(series_id).map(|h| h.stats())
    }

    /// Sum of point counts across every series
    pub fn total_point_count(&self) -> usize {
        self.series.read().values().map(|h| h.len()).sum()
    }

    /// Known series ids, sorted
    pub fn series_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.series.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    /// Drop every buffer. Handles still held elsewhere keep their data but
    /// are no longer reachable through the store.
    pub fn dispose(&self) {
        let disposed = std::mem::take(&mut *self.series.write());
        if !disposed.is_empty() {
            tracing::debug!("Disposed {} series buffer(s)", disposed.len());
        }
    }
}
