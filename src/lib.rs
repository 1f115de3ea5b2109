//! # chartfeed-rs: streaming market-data pipeline for live charts
//!
//! Receives a bidirectional stream of market samples (bars, ticks, markers,
//! indicator values), survives disconnects, and moves samples into
//! fixed-capacity per-series buffers at a bounded per-frame cost. A chart
//! renderer reads the buffers and asks the live window controller which
//! time range to show.
//!
//! ## Architecture
//!
//! - **Transport**: raw frame I/O ([`transport::TcpTransport`], or the
//!   in-memory [`transport::ScriptedTransport`] for tests)
//! - **Connection**: reconnect with exponential backoff and jitter
//! - **Ingest**: NDJSON decoding and a bounded FIFO queue drained per frame
//! - **Routing**: series id → pane, with an atomically swapped rule table
//! - **Buffers**: columnar ring buffers, one per series
//! - **Pipeline**: the per-frame scheduler and an optional threaded host
//!
//! ## Configuration
//!
//! Settings live in `pipeline.toml` under the platform config directory
//! (`dev.chartfeed.chartfeed-rs`):
//!
//! - **Linux**: `~/.config/dev.chartfeed.chartfeed-rs/`
//! - **macOS**: `~/Library/Application Support/dev.chartfeed.chartfeed-rs/`
//! - **Windows**: `%APPDATA%\dev.chartfeed.chartfeed-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use chartfeed_rs::{
//!     clock::SystemClock, config::PipelineConfig, pipeline::StreamPipeline,
//!     transport::TcpTransport,
//! };
//!
//! let config = PipelineConfig::default().with_route("*:ticks", "price");
//! let mut pipeline = StreamPipeline::new(config, TcpTransport::new(), SystemClock::shared())?;
//! pipeline.start();
//! pipeline.open("127.0.0.1:9400");
//! loop {
//!     let frame = pipeline.run_frame();
//!     if let Some(window) = frame.visible_window {
//!         // apply window to the chart, then redraw touched panes
//!     }
//! }
//! ```

pub mod buffer;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod ingest;
pub mod live_window;
pub mod pipeline;
pub mod routing;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use buffer::{SeriesBufferStore, SeriesHandle};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::PipelineConfig;
pub use connection::{ConnectionEvent, ConnectionState, ReconnectingConnection};
pub use error::{FeedError, Result};
pub use ingest::{JsonFrameDecoder, SampleIngestQueue};
pub use live_window::LiveWindowController;
pub use pipeline::{PipelineDriver, StreamPipeline};
pub use routing::{PaneId, PaneRoutingTable};
pub use types::{Payload, Sample, SampleBatch, SeriesCategory, TimeRange};
