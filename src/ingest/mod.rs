//! Ingest side of the pipeline
//!
//! Raw transport frames are turned into [`SampleBatch`](crate::types::SampleBatch)es
//! by a [`FrameDecoder`] and buffered in the bounded [`SampleIngestQueue`], which
//! is drained on a frame-budgeted schedule.
//!
//! # Main Types
//!
//! - [`SampleIngestQueue`] - Bounded FIFO of sample batches with a drop policy
//! - [`DrainSink`] - Receiver of drained batches
//! - [`JsonFrameDecoder`] - NDJSON frame decoder

pub mod decoder;
pub mod queue;

pub use decoder::{DecodedFrame, FrameDecoder, FrameKind, JsonFrameDecoder};
pub use queue::{
    DrainReport, DrainSink, DrainStop, EnqueueOutcome, QueueConfig, QueueStats, SampleIngestQueue,
};
