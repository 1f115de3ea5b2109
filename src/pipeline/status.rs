//! Status reporting for external UI/telemetry
//!
//! The pipeline pushes [`StatusReport`]s to registered [`StatusListener`]s
//! whenever the stage changes and every `status_interval_ms` otherwise. The
//! core never reads anything back from listeners.

use crate::connection::ConnectionState;
use crate::ingest::FrameKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Coarse pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusStage {
    Idle,
    Connecting,
    /// Connected, no data frame yet (or only heartbeats)
    Live,
    /// Receiving backfill
    History,
    /// Receiving incremental updates
    Delta,
    /// Gave up reconnecting or hit a terminal error
    Error,
    /// Closed by the caller
    Closed,
}

impl StatusStage {
    /// Map connection state plus the kind of the last data frame to a stage
    pub fn derive(state: ConnectionState, terminated: bool, last_data: Option<FrameKind>) -> Self {
        match state {
            ConnectionState::Idle => StatusStage::Idle,
            ConnectionState::Connecting | ConnectionState::Reconnecting => StatusStage::Connecting,
            ConnectionState::Closed if terminated => StatusStage::Error,
            ConnectionState::Closed => StatusStage::Closed,
            ConnectionState::Open => match last_data {
                Some(FrameKind::History) => StatusStage::History,
                Some(FrameKind::Delta) => StatusStage::Delta,
                Some(FrameKind::Heartbeat) | None => StatusStage::Live,
            },
        }
    }
}

impl fmt::Display for StatusStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusStage::Idle => "idle",
            StatusStage::Connecting => "connecting",
            StatusStage::Live => "live",
            StatusStage::History => "history",
            StatusStage::Delta => "delta",
            StatusStage::Error => "error",
            StatusStage::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Pushed to status listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub stage: StatusStage,
    /// Highest transport sequence accepted
    pub last_seq: Option<u64>,
    /// Samples received per second over the last full second
    pub rate_per_sec: f64,
    /// Local time since the last heartbeat frame
    pub heartbeat_lag_ms: Option<u64>,
}

/// Receiver of status reports
pub trait StatusListener: Send {
    fn on_status(&mut self, report: &StatusReport);
}

impl<F> StatusListener for F
where
    F: FnMut(&StatusReport) + Send,
{
    fn on_status(&mut self, report: &StatusReport) {
        self(report)
    }
}

/// Samples-per-second over fixed windows
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    window_start: Option<Duration>,
    count: u64,
    rate: f64,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            window_start: None,
            count: 0,
            rate: 0.0,
        }
    }

    pub fn record(&mut self, now: Duration, count: u64) {
        self.roll(now);
        self.count += count;
    }

    /// Rate of the last completed window
    pub fn rate(&mut self, now: Duration) -> f64 {
        self.roll(now);
        self.rate
    }

    fn roll(&mut self, now: Duration) {
        match self.window_start {
            None => self.window_start = Some(now),
            Some(start) => {
                let elapsed = now.saturating_sub(start);
                if elapsed >= self.window {
                    self.rate = self.count as f64 / elapsed.as_secs_f64();
                    self.count = 0;
                    self.window_start = Some(now);
                }
            }
        }
    }
}

/// Decides when a report is due
#[derive(Debug, Clone)]
pub(crate) struct StatusEmitter {
    interval: Duration,
    last_stage: Option<StatusStage>,
    last_emit: Option<Duration>,
}

impl StatusEmitter {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_stage: None,
            last_emit: None,
        }
    }

    /// True on a stage change or when the interval has elapsed
    pub(crate) fn due(&mut self, now: Duration, stage: StatusStage) -> bool {
        let changed = self.last_stage != Some(stage);
        let periodic = match self.last_emit {
            None => true,
            Some(at) => !self.interval.is_zero() && now.saturating_sub(at) >= self.interval,
        };
        if changed || periodic {
            self.last_stage = Some(stage);
            self.last_emit = Some(now);
            true
        } else {
            false
        }
    }
}
