//! Integration tests for pipeline config files

mod common;

use chartfeed_rs::clock::ManualClock;
use chartfeed_rs::config::{DropPolicy, PipelineConfig};
use chartfeed_rs::pipeline::StreamPipeline;
use chartfeed_rs::routing::MatchKind;
use chartfeed_rs::transport::ScriptedTransport;
use chartfeed_rs::PaneId;
use tempfile::TempDir;

const LAYOUT_TOML: &str = r#"
maxQueueSize = 64
dropPolicy = "reject"
windowWidthMs = 30000
routingFallbackEnabled = true

[capacities]
tick = 500

[[routes]]
pattern = "ES:ticks"
destination = "es-price"

[[routes]]
pattern = "*:indicator:*"
destination = "studies"
"#;

#[test]
fn test_layout_file_drives_routing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("layout.toml");
    std::fs::write(&path, LAYOUT_TOML).unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.max_queue_size, 64);
    assert_eq!(config.drop_policy, DropPolicy::Reject);
    assert_eq!(config.capacities.tick, 500);
    // Unspecified fields keep their defaults
    assert_eq!(config.capacities.bar, 20_000);
    assert_eq!(config.max_batches_per_frame, 8);

    let pipeline =
        StreamPipeline::new(config, ScriptedTransport::new(), ManualClock::new().shared())
            .unwrap();
    let routing = pipeline.routing();
    assert_eq!(
        routing.resolve_with_kind("ES:ticks"),
        Some((PaneId::from("es-price"), MatchKind::Explicit))
    );
    assert_eq!(
        routing.resolve_with_kind("NQ:indicator:vwap"),
        Some((PaneId::from("studies"), MatchKind::Pattern))
    );
    assert_eq!(
        routing.resolve_with_kind("NQ:bars"),
        Some((PaneId::from("price"), MatchKind::Fallback))
    );
}

#[test]
fn test_save_and_reload_both_formats() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        max_retries: 3,
        jitter_ratio: 0.1,
        ..Default::default()
    }
    .with_route("AAPL:*", "aapl");

    for name in ["nested/pipeline.toml", "pipeline.json"] {
        let path = dir.path().join(name);
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}

#[test]
fn test_invalid_file_is_rejected_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"maxQueueSize": 0}"#).unwrap();

    let err = PipelineConfig::load(&path).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("bad.json"), "{}", message);
    assert!(message.contains("maxQueueSize"), "{}", message);

    assert_eq!(PipelineConfig::load_or_default(&path), PipelineConfig::default());
    assert_eq!(
        PipelineConfig::load_or_default(dir.path().join("missing.toml")),
        PipelineConfig::default()
    );
}
