//! Bounded FIFO of decoded sample batches
//!
//! One [`SampleBatch`] is one queue entry. The depth bound is enforced inside
//! [`SampleIngestQueue::enqueue`]; draining happens in bounded chunks per
//! [`SampleIngestQueue::tick`] so a backlog is worked off over several frames
//! instead of stalling one.

use crate::clock::SharedClock;
use crate::config::{DropPolicy, PipelineConfig};
use crate::error::{FeedError, Result};
use crate::types::SampleBatch;
use std::collections::VecDeque;
use std::time::Duration;

/// Receives drained batches in FIFO order
pub trait DrainSink {
    fn on_batch(&mut self, batch: SampleBatch);
}

impl<F> DrainSink for F
where
    F: FnMut(SampleBatch),
{
    fn on_batch(&mut self, batch: SampleBatch) {
        self(batch)
    }
}

/// Queue bounds and drain budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub max_batches_per_frame: usize,
    pub max_ms_per_frame: f64,
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl QueueConfig {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_batches_per_frame: config.max_batches_per_frame,
            max_ms_per_frame: config.max_ms_per_frame,
            drop_policy: config.drop_policy,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(FeedError::InvalidArgument(
                "max_queue_size must be greater than 0".into(),
            ));
        }
        if self.max_batches_per_frame == 0 {
            return Err(FeedError::InvalidArgument(
                "max_batches_per_frame must be greater than 0".into(),
            ));
        }
        if !(self.max_ms_per_frame.is_finite() && self.max_ms_per_frame > 0.0) {
            return Err(FeedError::InvalidArgument(
                "max_ms_per_frame must be a positive number".into(),
            ));
        }
        Ok(())
    }

    fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(self.max_ms_per_frame / 1000.0)
    }
}

/// What `enqueue` did with a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended without overflow
    Accepted,
    /// Appended after evicting this many entries from the front
    AcceptedWithEviction { evicted: usize },
    /// Incoming batch discarded (`newest` policy)
    Dropped,
    /// Incoming batch discarded and counted as a rejection (`reject` policy)
    Rejected,
    /// Empty batch, nothing to do
    Ignored,
}

impl EnqueueOutcome {
    pub fn was_queued(&self) -> bool {
        matches!(
            self,
            EnqueueOutcome::Accepted | EnqueueOutcome::AcceptedWithEviction { .. }
        )
    }
}

/// Which bound ended a drain tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainStop {
    /// Nothing left to drain
    #[default]
    Empty,
    /// `max_batches_per_frame` reached
    BatchLimit,
    /// `max_ms_per_frame` exhausted
    TimeBudget,
    /// The queue is stopped
    Inactive,
}

/// Result of one drain tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrainReport {
    pub batches: usize,
    pub samples: usize,
    pub elapsed: Duration,
    pub remaining_depth: usize,
    pub stopped_by: DrainStop,
}

/// Queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub queue_depth: usize,
    pub total_enqueued: u64,
    /// Batches discarded by the `oldest`/`newest` policies
    pub total_dropped: u64,
    /// Batches discarded by the `reject` policy
    pub total_rejected: u64,
    /// Samples inside dropped or rejected batches
    pub dropped_samples: u64,
    pub peak_depth: usize,
}

/// Bounded batch queue with frame-budgeted draining
pub struct SampleIngestQueue {
    config: QueueConfig,
    clock: SharedClock,
    entries: VecDeque<SampleBatch>,
    sink: Option<Box<dyn DrainSink + Send>>,
    running: bool,
    stats: QueueStats,
}

impl SampleIngestQueue {
    /// Create a queue. Fails if any bound is zero.
    pub fn new(config: QueueConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entries: VecDeque::with_capacity(config.max_queue_size.min(4096)),
            config,
            clock,
            sink: None,
            running: false,
            stats: QueueStats::default(),
        })
    }

    /// Append a batch as one entry, applying the drop policy on overflow
    pub fn enqueue(&mut self, batch: SampleBatch) -> EnqueueOutcome {
        if batch.is_empty() {
            return EnqueueOutcome::Ignored;
        }

        let outcome = if self.entries.len() < self.config.max_queue_size {
            self.entries.push_back(batch);
            EnqueueOutcome::Accepted
        } else {
            match self.config.drop_policy {
                DropPolicy::Oldest => {
                    self.entries.push_back(batch);
                    let mut evicted = 0;
                    while self.entries.len() > self.config.max_queue_size {
                        if let Some(old) = self.entries.pop_front() {
                            self.stats.total_dropped += 1;
                            self.stats.dropped_samples += old.len() as u64;
                            evicted += 1;
                        }
                    }
                    tracing::trace!("Queue full: evicted {} oldest batch(es)", evicted);
                    EnqueueOutcome::AcceptedWithEviction { evicted }
                }
                DropPolicy::Newest => {
                    self.stats.total_dropped += 1;
                    self.stats.dropped_samples += batch.len() as u64;
                    tracing::trace!("Queue full: dropped incoming batch of {}", batch.len());
                    EnqueueOutcome::Dropped
                }
                DropPolicy::Reject => {
                    self.stats.total_rejected += 1;
                    self.stats.dropped_samples += batch.len() as u64;
                    tracing::trace!("Queue full: rejected incoming batch of {}", batch.len());
                    EnqueueOutcome::Rejected
                }
            }
        };

        if outcome.was_queued() {
            self.stats.total_enqueued += 1;
        }
        self.stats.peak_depth = self.stats.peak_depth.max(self.entries.len());
        outcome
    }

    /// Install the sink and activate ticking
    pub fn start<S>(&mut self, sink: S)
    where
        S: DrainSink + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
        self.running = true;
        tracing::debug!("Ingest queue started ({} queued)", self.entries.len());
    }

    /// Activate ticking without installing a sink (for [`Self::drain_into`] callers)
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Deactivate ticking. Queued batches stay for a later `start`.
    pub fn stop(&mut self) {
        if self.running {
            tracing::debug!("Ingest queue stopped ({} queued)", self.entries.len());
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One drain tick into the installed sink
    pub fn tick(&mut self) -> DrainReport {
        match self.sink.take() {
            Some(mut sink) => {
                let report = self.drain_into(&mut *sink);
                self.sink = Some(sink);
                report
            }
            None => DrainReport {
                remaining_depth: self.entries.len(),
                stopped_by: DrainStop::Inactive,
                ..Default::default()
            },
        }
    }

    /// One drain tick into an explicit sink.
    ///
    /// Both the batch bound and the time budget are checked before every
    /// delivery. A batch handed to the sink is never split.
    pub fn drain_into(&mut self, sink: &mut dyn DrainSink) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.running {
            report.remaining_depth = self.entries.len();
            report.stopped_by = DrainStop::Inactive;
            return report;
        }

        let started = self.clock.now();
        let budget = self.config.frame_budget();

        loop {
            let elapsed = self.clock.now().saturating_sub(started);
            if self.entries.is_empty() {
                report.stopped_by = DrainStop::Empty;
                break;
            }
            if report.batches >= self.config.max_batches_per_frame {
                report.stopped_by = DrainStop::BatchLimit;
                break;
            }
            if elapsed >= budget {
                report.stopped_by = DrainStop::TimeBudget;
                break;
            }
            let Some(batch) = self.entries.pop_front() else {
                break;
            };
            report.batches += 1;
            report.samples += batch.len();
            sink.on_batch(batch);
        }

        report.elapsed = self.clock.now().saturating_sub(started);
        report.remaining_depth = self.entries.len();
        if report.stopped_by == DrainStop::TimeBudget {
            tracing::debug!(
                "Drain hit time budget after {} batch(es), {} left",
                report.batches,
                report.remaining_depth
            );
        }
        report
    }

    /// Drop every queued batch (session reset). Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_depth: self.entries.len(),
            ..self.stats
        }
    }
}
