//! Building blocks of the pipeline configuration
//!
//! # Main Types
//!
//! - [`DropPolicy`] - What the ingest queue does when it is full
//! - [`CategoryCapacities`] - Default ring buffer sizes per series category
//! - [`RouteSpec`] - A declarative routing rule as written in a config file
//! - [`FallbackRouteSpec`] - A substring heuristic used only in fallback mode

use crate::types::SeriesCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overflow behaviour of the ingest queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Evict queued batches from the front until the new batch fits
    #[default]
    Oldest,
    /// Discard the incoming batch
    Newest,
    /// Discard the incoming batch and count it as a rejection
    Reject,
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropPolicy::Oldest => write!(f, "oldest"),
            DropPolicy::Newest => write!(f, "newest"),
            DropPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Default ring buffer capacity per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryCapacities {
    pub tick: usize,
    pub indicator: usize,
    pub bar: usize,
    pub marker: usize,
}

impl Default for CategoryCapacities {
    fn default() -> Self {
        Self {
            tick: 100_000,
            indicator: 50_000,
            bar: 20_000,
            marker: 5_000,
        }
    }
}

impl CategoryCapacities {
    /// Capacity for a category
    pub fn for_category(&self, category: SeriesCategory) -> usize {
        match category {
            SeriesCategory::Tick => self.tick,
            SeriesCategory::Indicator => self.indicator,
            SeriesCategory::Bar => self.bar,
            SeriesCategory::Marker => self.marker,
        }
    }

    /// Same capacity for every category (handy in tests)
    pub fn uniform(capacity: usize) -> Self {
        Self {
            tick: capacity,
            indicator: capacity,
            bar: capacity,
            marker: capacity,
        }
    }
}

/// Routing rule as declared in a layout/config file
///
/// `pattern` is an exact series id, a prefix ending in `*`, or a glob with `*`
/// anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub pattern: String,
    pub destination: String,
}

impl RouteSpec {
    pub fn new(pattern: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            destination: destination.into(),
        }
    }
}

/// Namespace heuristic used only when fallback routing is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRouteSpec {
    /// Substring searched for in the series id
    pub needle: String,
    pub destination: String,
}

impl FallbackRouteSpec {
    pub fn new(needle: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            destination: destination.into(),
        }
    }
}

/// Built-in heuristics, checked in order
pub fn default_fallback_routes() -> Vec<FallbackRouteSpec> {
    vec![
        FallbackRouteSpec::new(":ticks", "price"),
        FallbackRouteSpec::new(":bars", "price"),
        FallbackRouteSpec::new(":markers", "price"),
        FallbackRouteSpec::new(":indicator", "indicators"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_policy_serde() {
        let p: DropPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(p, DropPolicy::Reject);
        assert_eq!(serde_json::to_string(&DropPolicy::Oldest).unwrap(), "\"oldest\"");
        assert!(serde_json::from_str::<DropPolicy>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_capacities_per_category() {
        let caps = CategoryCapacities::default();
        assert_eq!(caps.for_category(SeriesCategory::Tick), 100_000);
        assert_eq!(caps.for_category(SeriesCategory::Bar), 20_000);
        assert_ne!(
            caps.for_category(SeriesCategory::Tick),
            caps.for_category(SeriesCategory::Indicator)
        );
    }

    #[test]
    fn test_partial_capacities_fill_defaults() {
        let caps: CategoryCapacities = serde_json::from_str(r#"{"tick": 10}"#).unwrap();
        assert_eq!(caps.tick, 10);
        assert_eq!(caps.bar, 20_000);
    }
}
