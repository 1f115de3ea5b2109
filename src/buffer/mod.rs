//! Per-series circular buffers
//!
//! # Main Types
//!
//! - [`SeriesBuffer`] - Fixed-capacity columnar ring for one series
//! - [`SeriesBufferStore`] - Shared registry, the read interface for renderers
//! - [`SeriesHandle`] - Stable reference to one buffer in the store

pub mod ring;
pub mod store;

pub use ring::{SeriesBuffer, SeriesSnapshot};
pub use store::{SeriesBufferStore, SeriesHandle, SeriesStats};
