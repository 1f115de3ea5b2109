//! Configuration module for chartfeed
//!
//! This module handles the pipeline configuration surface:
//! - Drain budget and ingest queue bounds
//! - Reconnect backoff policy
//! - Live window geometry and interaction quiet period
//! - Routing rules and fallback mode
//! - Buffer capacities per series category
//!
//! Configuration files may be TOML (`.toml`) or JSON (anything else). Keys are
//! camelCase and every key is optional.
//!
//! # Config Location
//!
//! The default configuration file lives in the platform config directory:
//! - **Linux**: `~/.config/dev.chartfeed.chartfeed-rs/pipeline.toml`
//! - **macOS**: `~/Library/Application Support/dev.chartfeed.chartfeed-rs/pipeline.toml`
//! - **Windows**: `%APPDATA%\dev.chartfeed.chartfeed-rs\pipeline.toml`
//!
//! # Example
//!
//! ```toml
//! maxBatchesPerFrame = 4
//! maxMsPerFrame = 6.0
//! maxQueueSize = 512
//! dropPolicy = "oldest"
//! routingFallbackEnabled = false
//!
//! [[routes]]
//! pattern = "*:ticks"
//! destination = "price-pane"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FeedError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.chartfeed.chartfeed-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "pipeline.toml";

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Pipeline Config ====================

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Queue entries drained per frame at most
    pub max_batches_per_frame: usize,
    /// Time budget of a single drain tick in milliseconds
    pub max_ms_per_frame: f64,
    /// Maximum queued batches
    pub max_queue_size: usize,
    /// Overflow behaviour of the ingest queue
    pub drop_policy: DropPolicy,

    /// First reconnect delay
    pub initial_delay_ms: u32,
    /// Reconnect delay cap
    pub max_delay_ms: u32,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Automatic retries before giving up
    pub max_retries: u32,
    /// Symmetric jitter applied to each delay (0.2 = ±20%)
    pub jitter_ratio: f64,

    /// Visible window width behind the data clock
    pub window_width_ms: u32,
    /// Extra space ahead of the data clock, as a fraction of the width
    pub right_padding_ratio: f64,
    /// Auto-scroll suppression after a user interaction
    pub interaction_quiet_ms: u32,

    /// Route unmatched series through namespace heuristics instead of dropping them
    pub routing_fallback_enabled: bool,
    /// Declarative routing rules, in precedence order
    pub routes: Vec<RouteSpec>,
    /// Heuristics consulted only in fallback mode
    pub fallback_routes: Vec<FallbackRouteSpec>,

    /// Ring buffer capacity per series category
    pub capacities: CategoryCapacities,

    /// Frame rate of the threaded driver
    pub frame_rate_hz: u32,
    /// Periodic status report interval
    pub status_interval_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batches_per_frame: 8,
            max_ms_per_frame: 4.0,
            max_queue_size: 1_024,
            drop_policy: DropPolicy::Oldest,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_retries: 10,
            jitter_ratio: 0.2,
            window_width_ms: 60_000,
            right_padding_ratio: 0.05,
            interaction_quiet_ms: 10_000,
            routing_fallback_enabled: false,
            routes: Vec::new(),
            fallback_routes: default_fallback_routes(),
            capacities: CategoryCapacities::default(),
            frame_rate_hz: 60,
            status_interval_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(FeedError::Config(msg.into()))
        }

        if self.max_queue_size == 0 {
            return invalid("maxQueueSize must be greater than 0");
        }
        if self.max_batches_per_frame == 0 {
            return invalid("maxBatchesPerFrame must be greater than 0");
        }
        if !(self.max_ms_per_frame.is_finite() && self.max_ms_per_frame > 0.0) {
            return invalid("maxMsPerFrame must be a positive number");
        }
        if self.initial_delay_ms == 0 {
            return invalid("initialDelayMs must be greater than 0");
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return invalid("maxDelayMs must be at least initialDelayMs");
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return invalid("backoffMultiplier must be >= 1");
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return invalid("jitterRatio must be in [0, 1)");
        }
        if self.window_width_ms == 0 {
            return invalid("windowWidthMs must be greater than 0");
        }
        if !(self.right_padding_ratio.is_finite() && self.right_padding_ratio >= 0.0) {
            return invalid("rightPaddingRatio must be a non-negative number");
        }
        let caps = self.capacities;
        if caps.tick == 0 || caps.indicator == 0 || caps.bar == 0 || caps.marker == 0 {
            return invalid("capacities must all be greater than 0");
        }
        if self.frame_rate_hz == 0 {
            return invalid("frameRateHz must be greater than 0");
        }
        for route in &self.routes {
            if route.pattern.is_empty() || route.destination.is_empty() {
                return invalid(format!(
                    "route '{}' -> '{}' needs a pattern and a destination",
                    route.pattern, route.destination
                ));
            }
        }
        Ok(())
    }

    /// Parse from a string; TOML when `is_toml`, JSON otherwise
    pub fn parse(content: &str, is_toml: bool) -> Result<Self> {
        let config: Self = if is_toml {
            toml::from_str(content)
                .map_err(|e| FeedError::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(content)
                .map_err(|e| FeedError::Config(format!("Failed to parse JSON config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FeedError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::parse(&content, is_toml_path(path))
            .with_context(|| format!("Loading {:?}", path))
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to disk; TOML or JSON by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_toml_path(path) {
            toml::to_string_pretty(self)
                .map_err(|e| FeedError::Serialization(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FeedError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        std::fs::write(path, content)
            .map_err(|e| FeedError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }

    /// Builder-style helper for tests and embedding
    pub fn with_route(mut self, pattern: impl Into<String>, destination: impl Into<String>) -> Self {
        self.routes.push(RouteSpec::new(pattern, destination));
        self
    }
}

fn is_toml_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
