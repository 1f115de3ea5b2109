//! Threaded host for a [`StreamPipeline`].
//!
//! The pipeline lives on one dedicated thread and is its only writer. The
//! caller talks to it through bounded crossbeam channels:
//! [`PipelineCommand`]s in, [`PipelineMessage`]s out. Renderers read the
//! shared [`SeriesBufferStore`] directly.

use super::executor::{PipelineStats, StreamPipeline};
use super::status::StatusReport;
use crate::buffer::SeriesBufferStore;
use crate::clock::SharedClock;
use crate::config::{PipelineConfig, RouteSpec};
use crate::connection::ConnectionEvent;
use crate::error::{FeedError, Result};
use crate::ingest::FrameDecoder;
use crate::transport::Transport;
use crate::types::{SampleBatch, TimeRange};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Channel capacity for commands (caller → pipeline)
const CMD_CHANNEL_CAPACITY: usize = 256;
/// Channel capacity for messages (pipeline → caller)
const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Commands sent to the pipeline thread
#[derive(Debug, Clone)]
pub enum PipelineCommand {
    /// Connect (or restart the reconnect cycle)
    Open(String),
    /// Disconnect and stop reconnecting
    Close,
    /// Start draining the ingest queue
    Start,
    /// Stop draining; queued batches are kept
    Stop,
    /// Send one frame upstream
    Send(Vec<u8>),
    /// Feed decoded samples directly
    Ingest(SampleBatch),
    /// Replace routing rules
    UpdateRoutes(Vec<RouteSpec>),
    /// Toggle namespace fallback routing
    SetFallbackEnabled(bool),
    /// User panned/zoomed
    UserInteracted,
    /// Stop following the newest data
    PauseLive,
    /// Follow the newest data again
    ResumeLive,
    /// Empty queue and buffers
    ClearData,
    /// Change the frame rate
    SetFrameRate(u32),
    /// Ask for a [`PipelineMessage::Stats`]
    RequestStats,
    /// Stop the pipeline thread
    Shutdown,
}

/// Messages sent from the pipeline thread
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// Status report (stage change or periodic)
    Status(StatusReport),
    /// Connection lifecycle event
    Connection(ConnectionEvent),
    /// New visible window for the renderer
    VisibleWindow(TimeRange),
    /// Pipeline counters
    Stats(PipelineStats),
    /// A command could not be applied
    Error(String),
    /// The pipeline thread is exiting
    Shutdown,
}

/// Caller-side handle to a running pipeline thread
pub struct PipelineDriver {
    cmd_tx: Sender<PipelineCommand>,
    msg_rx: Receiver<PipelineMessage>,
    store: Arc<SeriesBufferStore>,
    running: Arc<AtomicBool>,
    dropped_messages: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl PipelineDriver {
    /// Spawn a pipeline with the NDJSON decoder.
    ///
    /// The configuration is validated before the thread starts.
    pub fn spawn<T>(config: PipelineConfig, transport: T, clock: SharedClock) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let pipeline = StreamPipeline::new(config, transport, clock)?;
        Self::spawn_pipeline(pipeline)
    }

    /// Spawn an already built pipeline
    pub fn spawn_pipeline<T, D>(mut pipeline: StreamPipeline<T, D>) -> Result<Self>
    where
        T: Transport + 'static,
        D: FrameDecoder + 'static,
    {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let dropped_messages = Arc::new(AtomicU64::new(0));
        let store = pipeline.store();

        let outbox = Outbox {
            tx: msg_tx,
            dropped: dropped_messages.clone(),
        };
        let status_outbox = outbox.clone();
        pipeline.add_status_listener(move |report: &StatusReport| {
            status_outbox.post(PipelineMessage::Status(report.clone()));
        });

        let frame_rate_hz = pipeline.config().frame_rate_hz;
        let stats_interval = Duration::from_millis(pipeline.config().status_interval_ms.max(1) as u64);
        let mut worker = DriverLoop {
            pipeline,
            cmd_rx,
            outbox,
            running: running.clone(),
            frame_rate_hz,
            stats_interval,
            last_window: None,
        };

        let thread = std::thread::Builder::new()
            .name("chartfeed-pipeline".into())
            .spawn(move || worker.run())
            .map_err(|e| FeedError::Channel(format!("Failed to spawn pipeline thread: {}", e)))?;

        Ok(Self {
            cmd_tx,
            msg_rx,
            store,
            running,
            dropped_messages,
            thread: Some(thread),
        })
    }

    /// Shared buffer store for readers
    pub fn store(&self) -> Arc<SeriesBufferStore> {
        self.store.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Messages dropped because the caller was not draining fast enough
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn send_command(&self, cmd: PipelineCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn open(&self, address: impl Into<String>) {
        let _ = self.cmd_tx.send(PipelineCommand::Open(address.into()));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::Close);
    }

    pub fn start(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::Stop);
    }

    pub fn mark_user_interacted(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::UserInteracted);
    }

    pub fn update_routes(&self, routes: Vec<RouteSpec>) {
        let _ = self.cmd_tx.send(PipelineCommand::UpdateRoutes(routes));
    }

    pub fn request_stats(&self) {
        let _ = self.cmd_tx.send(PipelineCommand::RequestStats);
    }

    /// Drain all pending messages
    pub fn drain(&self) -> Vec<PipelineMessage> {
        self.msg_rx.try_iter().collect()
    }

    /// Try to receive a single message without blocking
    pub fn try_recv(&self) -> Option<PipelineMessage> {
        self.msg_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a message
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineMessage> {
        self.msg_rx.recv_timeout(timeout).ok()
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(PipelineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Pipeline thread panicked");
            }
        }
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for PipelineDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Non-blocking message sender. The pipeline never waits on a slow reader.
#[derive(Clone)]
struct Outbox {
    tx: Sender<PipelineMessage>,
    dropped: Arc<AtomicU64>,
}

impl Outbox {
    fn post(&self, msg: PipelineMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

struct DriverLoop<T: Transport, D: FrameDecoder> {
    pipeline: StreamPipeline<T, D>,
    cmd_rx: Receiver<PipelineCommand>,
    outbox: Outbox,
    running: Arc<AtomicBool>,
    frame_rate_hz: u32,
    stats_interval: Duration,
    last_window: Option<TimeRange>,
}

impl<T: Transport, D: FrameDecoder> DriverLoop<T, D> {
    fn run(&mut self) {
        tracing::info!("Pipeline thread started ({} Hz)", self.frame_rate_hz);
        let mut last_stats = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            self.process_commands();
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let report = self.pipeline.run_frame();
            for event in report.events {
                self.outbox.post(PipelineMessage::Connection(event));
            }
            if let Some(window) = report.visible_window {
                if self.last_window != Some(window) {
                    self.outbox.post(PipelineMessage::VisibleWindow(window));
                }
            }
            self.last_window = report.visible_window;

            if last_stats.elapsed() >= self.stats_interval {
                self.outbox.post(PipelineMessage::Stats(self.pipeline.stats()));
                last_stats = Instant::now();
            }

            self.rate_limit(frame_start);
        }

        self.pipeline.close();
        self.pipeline.stop();
        self.outbox.post(PipelineMessage::Shutdown);
        tracing::info!("Pipeline thread exiting");
    }

    fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                PipelineCommand::Open(address) => self.pipeline.open(&address),
                PipelineCommand::Close => self.pipeline.close(),
                PipelineCommand::Start => self.pipeline.start(),
                PipelineCommand::Stop => self.pipeline.stop(),
                PipelineCommand::Send(bytes) => {
                    if !self.pipeline.send(&bytes) {
                        self.outbox
                            .post(PipelineMessage::Error("send failed: not connected".into()));
                    }
                }
                PipelineCommand::Ingest(batch) => {
                    self.pipeline.ingest(batch);
                }
                PipelineCommand::UpdateRoutes(routes) => {
                    if let Err(e) = self.pipeline.update_routes(&routes) {
                        tracing::warn!("Rejected routing update: {}", e);
                        self.outbox.post(PipelineMessage::Error(e.to_string()));
                    }
                }
                PipelineCommand::SetFallbackEnabled(enabled) => {
                    self.pipeline.set_fallback_enabled(enabled)
                }
                PipelineCommand::UserInteracted => self.pipeline.mark_user_interacted(),
                PipelineCommand::PauseLive => self.pipeline.pause_live(),
                PipelineCommand::ResumeLive => self.pipeline.resume_live(),
                PipelineCommand::ClearData => self.pipeline.clear_data(),
                PipelineCommand::SetFrameRate(hz) => {
                    self.frame_rate_hz = hz.max(1);
                }
                PipelineCommand::RequestStats => {
                    self.outbox.post(PipelineMessage::Stats(self.pipeline.stats()));
                }
                PipelineCommand::Shutdown => {
                    self.running.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn rate_limit(&self, frame_start: Instant) {
        let target = Duration::from_nanos(1_000_000_000 / self.frame_rate_hz.max(1) as u64);
        let elapsed = frame_start.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}
