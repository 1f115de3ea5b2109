//! Streaming pipeline: connection → decode → queue → route → buffers.
//!
//! # Architecture
//!
//! ```text
//! [Transport] ──► [ReconnectingConnection] ──► [FrameDecoder]
//!                                                   │ (sequence filter)
//!                                                   ▼
//!                 [SeriesBufferStore] ◄── [BatchRouter] ◄── [SampleIngestQueue]
//!                         │
//!                         └──► renderer reads; [LiveWindowController] picks the window
//! ```
//!
//! # Design
//!
//! - **Cooperative frames**: [`StreamPipeline::run_frame`] does a bounded
//!   amount of work and returns; the host decides when frames happen.
//! - **Single writer**: only the pipeline appends to buffers. Readers share
//!   the store through an `Arc`.
//! - **Dedicated thread (optional)**: [`PipelineDriver`] hosts a pipeline on
//!   its own thread and talks to it over crossbeam channels.
//!
//! # Main Types
//!
//! - [`StreamPipeline`]: the frame scheduler
//! - [`PipelineDriver`]: threaded host
//! - [`SequenceTracker`]: replay/gap detection
//! - [`StatusReport`]: stage and rate pushed to listeners

pub mod driver;
pub mod executor;
pub mod sequence;
pub mod status;

pub use driver::{PipelineCommand, PipelineDriver, PipelineMessage};
pub use executor::{FrameReport, PipelineStats, StreamPipeline};
pub use sequence::{SequenceCheck, SequenceStats, SequenceTracker};
pub use status::{RateMeter, StatusListener, StatusReport, StatusStage};
