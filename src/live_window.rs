//! Auto-scrolling visible window
//!
//! The controller follows the newest data time (the data clock). It is either
//! `Live` or `Paused`; only explicit calls move between the two. A user
//! interaction suppresses auto-scroll for `interaction_quiet_ms` of local
//! time without leaving `Live`.

use crate::clock::SharedClock;
use crate::config::PipelineConfig;
use crate::types::TimeRange;
use serde::{Deserialize, Serialize};

/// Snapshot of the controller state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveWindowState {
    pub is_live: bool,
    /// Newest data time seen
    pub data_clock_ms: u64,
    /// Local clock time until which auto-scroll stays suppressed
    pub suppressed_until_ms: u64,
    pub window_width_ms: u32,
    pub right_padding_ratio: f64,
}

/// Computes the visible window from the newest data time
pub struct LiveWindowController {
    clock: SharedClock,
    is_live: bool,
    data_clock_ms: u64,
    suppressed_until_ms: u64,
    window_width_ms: u32,
    right_padding_ratio: f64,
    interaction_quiet_ms: u32,
}

impl LiveWindowController {
    pub fn new(
        clock: SharedClock,
        window_width_ms: u32,
        right_padding_ratio: f64,
        interaction_quiet_ms: u32,
    ) -> Self {
        Self {
            clock,
            is_live: true,
            data_clock_ms: 0,
            suppressed_until_ms: 0,
            window_width_ms: window_width_ms.max(1),
            right_padding_ratio: right_padding_ratio.max(0.0),
            interaction_quiet_ms,
        }
    }

    pub fn from_config(config: &PipelineConfig, clock: SharedClock) -> Self {
        Self::new(
            clock,
            config.window_width_ms,
            config.right_padding_ratio,
            config.interaction_quiet_ms,
        )
    }

    /// Advance the data clock. Returns true if it moved forward.
    pub fn on_new_data(&mut self, latest_timestamp_ms: u64) -> bool {
        if latest_timestamp_ms > self.data_clock_ms {
            self.data_clock_ms = latest_timestamp_ms;
            true
        } else {
            false
        }
    }

    /// Suppress auto-scroll for the quiet period (state stays as is)
    pub fn mark_user_interacted(&mut self) {
        self.suppressed_until_ms = self.clock.now_ms() + self.interaction_quiet_ms as u64;
    }

    pub fn pause(&mut self) {
        if self.is_live {
            tracing::debug!("Live window paused");
        }
        self.is_live = false;
    }

    /// Back to live. Also ends any interaction suppression.
    pub fn resume(&mut self) {
        if !self.is_live {
            tracing::debug!("Live window resumed");
        }
        self.is_live = true;
        self.suppressed_until_ms = 0;
    }

    /// Alias of [`Self::resume`]
    pub fn jump_to_live(&mut self) {
        self.resume();
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Whether an interaction quiet period is still running
    pub fn is_suppressed(&self) -> bool {
        self.clock.now_ms() < self.suppressed_until_ms
    }

    pub fn data_clock_ms(&self) -> u64 {
        self.data_clock_ms
    }

    pub fn set_window_width_ms(&mut self, width_ms: u32) {
        self.window_width_ms = width_ms.max(1);
    }

    /// Forget the data clock (session reset)
    pub fn reset_data_clock(&mut self) {
        self.data_clock_ms = 0;
    }

    /// `[clock - width, clock + width * padding]` while live and not
    /// suppressed, `None` otherwise (leave the view alone).
    pub fn compute_visible_window(&self) -> Option<TimeRange> {
        if !self.is_live || self.data_clock_ms == 0 || self.is_suppressed() {
            return None;
        }
        let clock = self.data_clock_ms as f64;
        let width = self.window_width_ms as f64;
        Some(TimeRange::new(
            (clock - width).max(0.0),
            clock + width * self.right_padding_ratio,
        ))
    }

    pub fn state(&self) -> LiveWindowState {
        LiveWindowState {
            is_live: self.is_live,
            data_clock_ms: self.data_clock_ms,
            suppressed_until_ms: self.suppressed_until_ms,
            window_width_ms: self.window_width_ms,
            right_padding_ratio: self.right_padding_ratio,
        }
    }
}
