//! Transport sequence tracking
//!
//! Delivery is at-least-once. After a reconnect the sender may replay samples
//! we already have, skip some, or number a fresh stream from the start.
//! Replays (`seq <= last`, nothing newer in time) are counted and dropped;
//! gaps are counted. Nothing is reordered.
//!
//! A reconnect re-baselines the tracker: the first backwards sequence number
//! that carries a newer timestamp than anything accepted so far is taken as a
//! restarted stream and starts a new run.

/// Result of checking one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First sample or exactly `last + 1`
    InOrder,
    /// Newer than expected; `missing` numbers were skipped
    Gap { missing: u64 },
    /// The sender renumbered its stream after a reconnect
    Restart,
    /// Already seen
    Duplicate,
}

impl SequenceCheck {
    pub fn is_fresh(&self) -> bool {
        !matches!(self, SequenceCheck::Duplicate)
    }
}

/// Sequence counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceStats {
    pub last_seq: Option<u64>,
    pub accepted: u64,
    pub gaps: u64,
    pub missing: u64,
    pub duplicates: u64,
    pub restarts: u64,
}

/// Tracks the highest sequence number seen on the stream
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    stats: SequenceStats,
    newest_timestamp_ms: Option<u64>,
    /// Set by a reconnect until the next fresh sample
    rebaseline: bool,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seq: u64, timestamp_ms: u64) -> SequenceCheck {
        let check = match self.stats.last_seq {
            None => SequenceCheck::InOrder,
            Some(last) if seq <= last => {
                let newer = self.newest_timestamp_ms.map_or(true, |t| timestamp_ms > t);
                if self.rebaseline && newer {
                    SequenceCheck::Restart
                } else {
                    SequenceCheck::Duplicate
                }
            }
            Some(last) if seq == last + 1 => SequenceCheck::InOrder,
            Some(last) => SequenceCheck::Gap {
                missing: seq - last - 1,
            },
        };

        match check {
            SequenceCheck::Duplicate => self.stats.duplicates += 1,
            SequenceCheck::Gap { missing } => {
                self.stats.gaps += 1;
                self.stats.missing += missing;
                tracing::debug!("Sequence gap: {} missing before {}", missing, seq);
            }
            SequenceCheck::Restart => {
                self.stats.restarts += 1;
                tracing::info!(
                    "Stream restarted at seq {} (previous run ended at {:?})",
                    seq,
                    self.stats.last_seq
                );
            }
            SequenceCheck::InOrder => {}
        }
        if check.is_fresh() {
            self.stats.accepted += 1;
            self.stats.last_seq = Some(seq);
            self.newest_timestamp_ms = self.newest_timestamp_ms.max(Some(timestamp_ms));
            self.rebaseline = false;
        }
        check
    }

    /// A new connection was established; the sender may renumber its stream.
    /// Counters and the last position are kept.
    pub fn reset_baseline(&mut self) {
        self.rebaseline = self.stats.last_seq.is_some();
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.stats.last_seq
    }

    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    /// Forget the stream position (session reset). Counters restart too.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
