//! Pipeline executor: one cooperative frame at a time.
//!
//! [`StreamPipeline::run_frame`] is the whole scheduler. Each frame:
//! 1. Poll the connection (fires due reconnect timers, collects frames).
//! 2. Decode frames, drop replayed sequences, enqueue fresh batches.
//! 3. Drain a bounded amount of the queue into the buffer store.
//! 4. Advance the data clock and compute the visible window.
//! 5. Push a status report if one is due.
//!
//! Nothing here blocks or sleeps; a host calls `run_frame` from its frame
//! source (see [`super::driver::PipelineDriver`] for a threaded host).

use super::sequence::{SequenceStats, SequenceTracker};
use super::status::{RateMeter, StatusEmitter, StatusListener, StatusReport, StatusStage};
use crate::buffer::SeriesBufferStore;
use crate::clock::SharedClock;
use crate::config::{PipelineConfig, RouteSpec};
use crate::connection::{BackoffPolicy, ConnectionEvent, ConnectionSnapshot, ReconnectingConnection};
use crate::error::Result;
use crate::ingest::{
    DrainReport, DrainSink, EnqueueOutcome, FrameDecoder, FrameKind, JsonFrameDecoder,
    QueueConfig, QueueStats, SampleIngestQueue,
};
use crate::live_window::LiveWindowController;
use crate::routing::{PaneId, PaneRoutingTable};
use crate::transport::Transport;
use crate::types::{Sample, SampleBatch, TimeRange};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one frame
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub drain: DrainReport,
    /// Window for the renderer to apply; `None` means leave the view alone
    pub visible_window: Option<TimeRange>,
    /// Connection events raised since the previous frame (raw frames excluded)
    pub events: Vec<ConnectionEvent>,
    /// Panes that received data this frame
    pub touched_panes: Vec<PaneId>,
    /// Status pushed to listeners this frame, if any
    pub status: Option<StatusReport>,
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PipelineStats {
    pub frames: u64,
    pub decoded_frames: u64,
    pub decode_errors: u64,
    pub heartbeats: u64,
    pub routed_samples: u64,
    pub unrouted_samples: u64,
    pub routing_misses: u64,
    /// Samples the store refused (layout mismatch)
    pub rejected_samples: u64,
    pub sequence: SequenceStats,
    pub queue: QueueStats,
    pub total_points: usize,
    pub series_count: usize,
}

/// Drain sink that routes each series and commits it to the store
struct BatchRouter {
    store: Arc<SeriesBufferStore>,
    routing: Arc<PaneRoutingTable>,
    latest_timestamp_ms: Option<u64>,
    touched: BTreeSet<PaneId>,
    routed_samples: u64,
    unrouted_samples: u64,
    rejected_samples: u64,
}

impl BatchRouter {
    fn new(store: Arc<SeriesBufferStore>, routing: Arc<PaneRoutingTable>) -> Self {
        Self {
            store,
            routing,
            latest_timestamp_ms: None,
            touched: BTreeSet::new(),
            routed_samples: 0,
            unrouted_samples: 0,
            rejected_samples: 0,
        }
    }

    /// Split a batch into per-series runs, keeping arrival order
    fn group_by_series(batch: SampleBatch) -> Vec<(String, Vec<Sample>)> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<Sample>)> = Vec::new();
        for sample in batch {
            match index.get(&sample.series_id) {
                Some(&i) => groups[i].1.push(sample),
                None => {
                    index.insert(sample.series_id.clone(), groups.len());
                    groups.push((sample.series_id.clone(), vec![sample]));
                }
            }
        }
        groups
    }

    fn take_frame_output(&mut self) -> (Option<u64>, Vec<PaneId>) {
        (
            self.latest_timestamp_ms.take(),
            std::mem::take(&mut self.touched).into_iter().collect(),
        )
    }
}

impl DrainSink for BatchRouter {
    fn on_batch(&mut self, batch: SampleBatch) {
        for (series_id, samples) in Self::group_by_series(batch) {
            let count = samples.len() as u64;
            let Some(pane) = self.routing.resolve(&series_id) else {
                self.unrouted_samples += count;
                tracing::trace!("No route for '{}', dropped {} sample(s)", series_id, count);
                continue;
            };
            match self.store.append_samples(&series_id, &samples) {
                Ok(()) => {
                    self.routed_samples += count;
                    let newest = samples.iter().map(|s| s.timestamp_ms).max();
                    self.latest_timestamp_ms = self.latest_timestamp_ms.max(newest);
                    self.touched.insert(pane);
                }
                Err(e) => {
                    self.rejected_samples += count;
                    tracing::warn!("Dropped {} sample(s): {}", count, e);
                }
            }
        }
    }
}

/// The streaming pipeline
pub struct StreamPipeline<T: Transport, D: FrameDecoder = JsonFrameDecoder> {
    config: PipelineConfig,
    clock: SharedClock,
    connection: ReconnectingConnection<T>,
    decoder: D,
    queue: SampleIngestQueue,
    store: Arc<SeriesBufferStore>,
    routing: Arc<PaneRoutingTable>,
    live: LiveWindowController,
    router: BatchRouter,
    sequence: SequenceTracker,
    listeners: Vec<Box<dyn StatusListener>>,
    emitter: StatusEmitter,
    rate: RateMeter,
    last_data_kind: Option<FrameKind>,
    last_heartbeat: Option<Duration>,
    terminated: bool,
    stats: PipelineStats,
}

impl<T: Transport> StreamPipeline<T, JsonFrameDecoder> {
    /// Pipeline with the NDJSON decoder. Fails if the configuration is invalid.
    pub fn new(config: PipelineConfig, transport: T, clock: SharedClock) -> Result<Self> {
        Self::with_decoder(config, transport, JsonFrameDecoder::new(), clock)
    }
}

impl<T: Transport, D: FrameDecoder> StreamPipeline<T, D> {
    /// Pipeline with a custom decoder
    pub fn with_decoder(
        config: PipelineConfig,
        transport: T,
        decoder: D,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;

        let store = SeriesBufferStore::shared(config.capacities);
        let routing = Arc::new(PaneRoutingTable::from_config(&config)?);
        let queue = SampleIngestQueue::new(QueueConfig::from_config(&config), clock.clone())?;
        let connection =
            ReconnectingConnection::new(transport, BackoffPolicy::from_config(&config), clock.clone());
        let live = LiveWindowController::from_config(&config, clock.clone());
        let router = BatchRouter::new(store.clone(), routing.clone());
        let emitter = StatusEmitter::new(Duration::from_millis(config.status_interval_ms as u64));

        tracing::info!(
            "Pipeline created: queue {} ({}), drain {} batch(es) / {}ms, {} route(s), fallback {}",
            config.max_queue_size,
            config.drop_policy,
            config.max_batches_per_frame,
            config.max_ms_per_frame,
            routing.rule_count(),
            config.routing_fallback_enabled
        );

        Ok(Self {
            config,
            clock,
            connection,
            decoder,
            queue,
            store,
            routing,
            live,
            router,
            sequence: SequenceTracker::new(),
            listeners: Vec::new(),
            emitter,
            rate: RateMeter::default(),
            last_data_kind: None,
            last_heartbeat: None,
            terminated: false,
            stats: PipelineStats::default(),
        })
    }

    /// Deterministic reconnect jitter (tests)
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.connection = self.connection.with_rng_seed(seed);
        self
    }

    // ── Connection ──

    pub fn open(&mut self, address: &str) {
        self.terminated = false;
        self.connection.open(address);
    }

    pub fn close(&mut self) {
        self.connection.close();
    }

    /// Send one frame upstream. False unless connected.
    pub fn send(&mut self, bytes: &[u8]) -> bool {
        self.connection.send(bytes)
    }

    pub fn connection(&self) -> ConnectionSnapshot {
        self.connection.snapshot()
    }

    // ── Drain control ──

    /// Start draining on every frame
    pub fn start(&mut self) {
        self.queue.resume();
    }

    /// Stop draining; queued batches are kept
    pub fn stop(&mut self) {
        self.queue.stop();
    }

    pub fn is_draining(&self) -> bool {
        self.queue.is_running()
    }

    /// Feed an already decoded batch, bypassing the transport
    pub fn ingest(&mut self, batch: SampleBatch) -> EnqueueOutcome {
        let fresh: SampleBatch = batch
            .into_iter()
            .filter(|s| self.sequence.observe(s.sequence, s.timestamp_ms).is_fresh())
            .collect();
        let now = self.clock.now();
        self.rate.record(now, fresh.len() as u64);
        let outcome = self.queue.enqueue(fresh);
        match outcome {
            EnqueueOutcome::AcceptedWithEviction { evicted } => {
                tracing::warn!("Ingest queue full: dropped {} oldest batch(es)", evicted)
            }
            EnqueueOutcome::Dropped => tracing::warn!("Ingest queue full: dropped newest batch"),
            EnqueueOutcome::Rejected => tracing::warn!("Ingest queue full: rejected batch"),
            EnqueueOutcome::Accepted | EnqueueOutcome::Ignored => {}
        }
        outcome
    }

    // ── Frame ──

    /// Run one cooperative frame
    pub fn run_frame(&mut self) -> FrameReport {
        self.stats.frames += 1;
        let mut report = FrameReport::default();

        for event in self.connection.poll() {
            match event {
                ConnectionEvent::Frame(bytes) => self.handle_frame(&bytes),
                other => {
                    self.observe_connection_event(&other);
                    report.events.push(other);
                }
            }
        }

        report.drain = self.queue.drain_into(&mut self.router);
        let (latest, touched) = self.router.take_frame_output();
        if let Some(latest) = latest {
            self.live.on_new_data(latest);
        }
        report.touched_panes = touched;
        report.visible_window = self.live.compute_visible_window();
        report.status = self.emit_status_if_due();

        if report.drain.batches > 0 {
            tracing::trace!(
                "Frame {}: drained {} batch(es) / {} sample(s), {} left",
                self.stats.frames,
                report.drain.batches,
                report.drain.samples,
                report.drain.remaining_depth
            );
        }
        report
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        let frame = match self.decoder.decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Skipping undecodable frame ({} bytes): {}", bytes.len(), e);
                return;
            }
        };
        self.stats.decoded_frames += 1;

        match frame.kind {
            FrameKind::Heartbeat => {
                self.stats.heartbeats += 1;
                self.last_heartbeat = Some(self.clock.now());
            }
            kind => {
                self.last_data_kind = Some(kind);
            }
        }
        if !frame.samples.is_empty() {
            self.ingest(frame.samples);
        }
    }

    fn observe_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.terminated = false;
                self.last_data_kind = None;
                self.sequence.reset_baseline();
                tracing::info!(
                    "Connected to {}",
                    self.connection.address().unwrap_or("<unknown>")
                );
            }
            ConnectionEvent::Terminated { error } => {
                self.terminated = true;
                tracing::error!("Connection gave up: {}", error);
            }
            ConnectionEvent::RetryScheduled {
                retry_count,
                delay_ms,
            } => {
                tracing::info!("Reconnect attempt {} in {}ms", retry_count, delay_ms);
            }
            _ => {}
        }
    }

    // ── Status ──

    pub fn add_status_listener<L>(&mut self, listener: L)
    where
        L: StatusListener + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Current status (does not notify listeners)
    pub fn status(&mut self) -> StatusReport {
        let now = self.clock.now();
        StatusReport {
            stage: StatusStage::derive(self.connection.state(), self.terminated, self.last_data_kind),
            last_seq: self.sequence.last_seq(),
            rate_per_sec: self.rate.rate(now),
            heartbeat_lag_ms: self
                .last_heartbeat
                .map(|at| now.saturating_sub(at).as_millis() as u64),
        }
    }

    fn emit_status_if_due(&mut self) -> Option<StatusReport> {
        let report = self.status();
        if !self.emitter.due(self.clock.now(), report.stage) {
            return None;
        }
        for listener in &mut self.listeners {
            listener.on_status(&report);
        }
        Some(report)
    }

    // ── Live window ──

    pub fn mark_user_interacted(&mut self) {
        self.live.mark_user_interacted();
    }

    pub fn pause_live(&mut self) {
        self.live.pause();
    }

    pub fn resume_live(&mut self) {
        self.live.resume();
    }

    pub fn live_window(&self) -> &LiveWindowController {
        &self.live
    }

    pub fn live_window_mut(&mut self) -> &mut LiveWindowController {
        &mut self.live
    }

    // ── Routing ──

    /// Replace routing rules. Buffers are untouched.
    pub fn update_routes(&mut self, routes: &[RouteSpec]) -> Result<()> {
        self.routing.rebuild_from_specs(routes)?;
        self.config.routes = routes.to_vec();
        Ok(())
    }

    pub fn set_fallback_enabled(&mut self, enabled: bool) {
        self.routing.set_fallback_enabled(enabled);
        self.config.routing_fallback_enabled = enabled;
    }

    // ── Data ──

    /// Shared buffer store (the renderer's read interface)
    pub fn store(&self) -> Arc<SeriesBufferStore> {
        self.store.clone()
    }

    pub fn routing(&self) -> Arc<PaneRoutingTable> {
        self.routing.clone()
    }

    /// Session reset: empty the queue and buffers, forget the data clock
    /// and stream position. Buffers keep their capacity.
    pub fn clear_data(&mut self) {
        self.queue.clear();
        self.store.clear_all();
        self.live.reset_data_clock();
        self.sequence.reset();
        tracing::info!("Pipeline data cleared");
    }

    /// Close the connection and release every buffer
    pub fn dispose(&mut self) {
        self.connection.close();
        self.queue.stop();
        self.queue.clear();
        self.store.dispose();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            decode_errors: self.decoder.decode_errors(),
            routed_samples: self.router.routed_samples,
            unrouted_samples: self.router.unrouted_samples,
            rejected_samples: self.router.rejected_samples,
            routing_misses: self.routing.misses(),
            sequence: self.sequence.stats(),
            queue: self.queue.stats(),
            total_points: self.store.total_point_count(),
            series_count: self.store.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::ConnectionState;
    use crate::transport::{ScriptedTransport, ScriptedTransportHandle, TransportError};
    use std::sync::Mutex;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_batches_per_frame: 2,
            jitter_ratio: 0.0,
            ..Default::default()
        }
        .with_route("*:ticks", "price-pane")
    }

    fn pipeline(
        config: PipelineConfig,
    ) -> (StreamPipeline<ScriptedTransport>, ScriptedTransportHandle, ManualClock) {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new();
        let handle = transport.handle();
        let pipeline = StreamPipeline::new(config, transport, clock.shared()).unwrap();
        (pipeline, handle, clock)
    }

    fn ticks(from_seq: u64, n: u64) -> SampleBatch {
        (0..n)
            .map(|i| Sample::tick(from_seq + i, "AAPL:ticks", 100_000 + from_seq + i, 1.0, None))
            .collect()
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let bad = PipelineConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        let result = StreamPipeline::new(bad, ScriptedTransport::new(), ManualClock::new().shared());
        assert!(result.is_err());
    }

    #[test]
    fn test_frames_flow_into_store() {
        let (mut p, handle, _clock) = pipeline(config());
        p.start();
        p.open("feed:1");
        handle.push_frame(
            r#"{"type":"delta","samples":[{"seq":1,"series_id":"AAPL:ticks","t_ms":100000,"payload":{"price":10.0}}]}"#,
        );

        let report = p.run_frame();
        assert_eq!(report.drain.samples, 1);
        assert_eq!(report.touched_panes, vec![PaneId::from("price-pane")]);
        assert_eq!(
            report.visible_window,
            Some(TimeRange::new(40_000.0, 103_000.0))
        );
        assert_eq!(p.store().stats("AAPL:ticks").map(|s| s.count), Some(1));
    }

    #[test]
    fn test_drain_is_spread_over_frames() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.start();
        for i in 0..3 {
            p.ingest(ticks(i * 10, 10));
        }
        assert_eq!(p.stats().queue.queue_depth, 3);

        let first = p.run_frame();
        assert_eq!((first.drain.batches, first.drain.samples), (2, 20));
        assert_eq!(first.drain.remaining_depth, 1);

        let second = p.run_frame();
        assert_eq!((second.drain.batches, second.drain.samples), (1, 10));
        assert_eq!(second.drain.remaining_depth, 0);
    }

    #[test]
    fn test_unrouted_series_dropped_in_strict_mode() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.start();
        p.ingest(vec![
            Sample::tick(1, "AAPL:ticks", 1_000, 1.0, None),
            Sample::scalar(2, "AAPL:unknown", 1_000, 1.0),
        ]);
        p.run_frame();

        let stats = p.stats();
        assert_eq!(stats.routed_samples, 1);
        assert_eq!(stats.unrouted_samples, 1);
        assert_eq!(stats.routing_misses, 1);
        assert!(p.store().get("AAPL:unknown").is_none());
    }

    #[test]
    fn test_replayed_sequences_skipped() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.start();
        p.ingest(ticks(1, 5));
        assert_eq!(p.ingest(ticks(3, 3)), EnqueueOutcome::Ignored);
        p.ingest(ticks(10, 1));
        p.run_frame();

        let stats = p.stats();
        assert_eq!(stats.sequence.duplicates, 3);
        assert_eq!(stats.sequence.gaps, 1);
        assert_eq!(stats.sequence.missing, 4);
        assert_eq!(stats.total_points, 6);
    }

    #[test]
    fn test_renumbered_stream_after_reconnect_is_accepted() {
        let (mut p, handle, clock) = pipeline(config());
        p.start();
        p.open("feed:1");
        p.ingest(ticks(1, 5));
        p.run_frame();

        handle.drop_connection(None);
        p.run_frame();
        assert_eq!(p.connection().state, ConnectionState::Reconnecting);
        clock.advance_ms(5_000);
        p.run_frame();
        assert_eq!(p.connection().state, ConnectionState::Open);

        // The server numbers its new stream from 1 again
        let renumbered: SampleBatch = (1..=3)
            .map(|seq| Sample::tick(seq, "AAPL:ticks", 200_000 + seq, 1.0, None))
            .collect();
        assert_eq!(p.ingest(renumbered), EnqueueOutcome::Accepted);
        p.run_frame();

        assert_eq!(p.store().stats("AAPL:ticks").map(|s| s.count), Some(8));
        let sequence = p.stats().sequence;
        assert_eq!(sequence.restarts, 1);
        assert_eq!(sequence.duplicates, 0);
        assert_eq!(sequence.last_seq, Some(3));
    }

    #[test]
    fn test_stopped_pipeline_keeps_queue() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.ingest(ticks(1, 5));
        assert_eq!(p.run_frame().drain.batches, 0);
        p.start();
        assert_eq!(p.run_frame().drain.batches, 1);
    }

    #[test]
    fn test_status_listener_sees_stage_changes() {
        let (mut p, handle, clock) = pipeline(config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        p.add_status_listener(move |r: &StatusReport| sink.lock().unwrap().push(r.stage));

        p.run_frame();
        p.open("feed:1");
        p.run_frame();
        handle.push_frame(r#"{"type":"history","samples":[]}"#);
        p.run_frame();
        handle.push_frame(r#"{"type":"heartbeat"}"#);
        p.run_frame();
        clock.advance_ms(250);
        assert_eq!(p.status().heartbeat_lag_ms, Some(250));
        p.close();
        p.run_frame();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                StatusStage::Idle,
                StatusStage::Live,
                StatusStage::History,
                StatusStage::Closed
            ]
        );
    }

    #[test]
    fn test_terminal_failure_reports_error_stage() {
        let config = PipelineConfig {
            max_retries: 1,
            ..config()
        };
        let (mut p, handle, clock) = pipeline(config);
        handle.fail_next_connects(5, TransportError::Refused("down".into()));
        p.open("feed:1");
        p.run_frame();
        assert_eq!(p.connection().state, ConnectionState::Reconnecting);

        clock.advance_ms(1_000);
        let report = p.run_frame();
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Terminated { .. })));
        assert_eq!(p.status().stage, StatusStage::Error);
    }

    #[test]
    fn test_clear_data_keeps_buffers() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.start();
        p.ingest(ticks(1, 4));
        p.run_frame();
        let handle = p.store().get("AAPL:ticks").unwrap();

        p.clear_data();
        assert_eq!(handle.len(), 0);
        assert_eq!(p.live_window().data_clock_ms(), 0);
        assert!(p.store().get("AAPL:ticks").unwrap().same_buffer(&handle));
    }

    #[test]
    fn test_reroute_does_not_recreate_buffers() {
        let (mut p, _handle, _clock) = pipeline(config());
        p.start();
        p.ingest(ticks(1, 2));
        p.run_frame();
        let before = p.store().get("AAPL:ticks").unwrap();

        p.update_routes(&[RouteSpec::new("AAPL:*", "aapl")]).unwrap();
        p.ingest(ticks(3, 2));
        let report = p.run_frame();
        assert_eq!(report.touched_panes, vec![PaneId::from("aapl")]);
        assert!(before.same_buffer(&p.store().get("AAPL:ticks").unwrap()));
        assert_eq!(before.len(), 4);
    }
}
