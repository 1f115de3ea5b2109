//! Exponential backoff with symmetric jitter

use crate::config::PipelineConfig;
use rand::Rng;

/// Reconnect delay policy.
///
/// `delay(n) = min(max_delay, initial_delay * multiplier^n)`, then scaled by a
/// random factor in `[1 - jitter_ratio, 1 + jitter_ratio]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u32,
    pub max_delay_ms: u32,
    pub multiplier: f64,
    pub max_retries: u32,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: 10,
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Build from the pipeline configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.backoff_multiplier,
            max_retries: config.max_retries,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Delay before jitter for a given retry count (capped at `max_delay_ms`)
    pub fn base_delay_ms(&self, retry_count: u32) -> u32 {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        if !raw.is_finite() || raw >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            raw.round() as u32
        }
    }

    /// Delay with jitter applied
    pub fn jittered_delay_ms<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> u32 {
        let base = self.base_delay_ms(retry_count) as f64;
        if self.jitter_ratio <= 0.0 {
            return base as u32;
        }
        let factor = rng.gen_range((1.0 - self.jitter_ratio)..=(1.0 + self.jitter_ratio));
        (base * factor).round().max(0.0) as u32
    }
}
