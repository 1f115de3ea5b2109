//! Scripted pipeline construction helpers

use chartfeed_rs::clock::ManualClock;
use chartfeed_rs::config::{CategoryCapacities, PipelineConfig};
use chartfeed_rs::pipeline::{FrameReport, StreamPipeline};
use chartfeed_rs::transport::{ScriptedTransport, ScriptedTransportHandle};

/// Pipeline wired to a scripted transport and a manual clock
pub struct ScriptedPipeline {
    pub pipeline: StreamPipeline<ScriptedTransport>,
    pub feed: ScriptedTransportHandle,
    pub clock: ManualClock,
}

impl ScriptedPipeline {
    /// Run `count` frames, advancing the clock by `step_ms` before each
    pub fn run_frames(&mut self, count: usize, step_ms: u64) -> Vec<FrameReport> {
        (0..count)
            .map(|_| {
                self.clock.advance_ms(step_ms);
                self.pipeline.run_frame()
            })
            .collect()
    }
}

/// Small capacities, no jitter, strict routing with the usual panes
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        capacities: CategoryCapacities::uniform(8),
        jitter_ratio: 0.0,
        initial_delay_ms: 100,
        max_delay_ms: 1_000,
        max_retries: 3,
        ..Default::default()
    }
    .with_route("*:ticks", "price")
    .with_route("*:bars", "price")
    .with_route("*:markers", "price")
    .with_route("*:indicator:*", "indicators")
}

pub fn scripted_pipeline(config: PipelineConfig) -> ScriptedPipeline {
    let clock = ManualClock::new();
    let transport = ScriptedTransport::new();
    let feed = transport.handle();
    let pipeline = StreamPipeline::new(config, transport, clock.shared())
        .expect("valid config")
        .with_rng_seed(7);
    ScriptedPipeline {
        pipeline,
        feed,
        clock,
    }
}

/// Started, connected pipeline with the default test config
pub fn connected_pipeline() -> ScriptedPipeline {
    let mut sp = scripted_pipeline(test_config());
    sp.pipeline.start();
    sp.pipeline.open("feed:test");
    sp.pipeline.run_frame();
    sp
}
