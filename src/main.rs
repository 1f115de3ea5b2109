//! chartfeed - headless feed monitor
//!
//! Connects to a sample feed, runs the pipeline on its own thread and logs
//! status, the visible window and buffer counts. Useful for checking a feed
//! and a routing config without a chart attached.

use anyhow::Context;
use chartfeed_rs::{
    clock::SystemClock,
    config::{default_config_path, PipelineConfig},
    connection::ConnectionEvent,
    pipeline::{PipelineDriver, PipelineMessage},
    transport::TcpTransport,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chartfeed", version, about = "Stream a sample feed into chart buffers")]
struct Cli {
    /// Feed address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9400")]
    address: String,

    /// Pipeline config file (TOML or JSON). Defaults to the platform config dir.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write daily rolling logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Exit after this many seconds (runs until the feed gives up otherwise)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    tracing::info!("Starting chartfeed against {}", cli.address);

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) if path.exists() => PipelineConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        Some(path) => {
            tracing::info!("No config at {:?}, using defaults", path);
            PipelineConfig::default()
        }
        None => PipelineConfig::default(),
    };

    let mut driver = PipelineDriver::spawn(config, TcpTransport::new(), SystemClock::shared())
        .context("starting pipeline")?;
    driver.start();
    driver.open(cli.address.clone());

    let deadline = cli
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    'outer: loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Duration elapsed");
            break;
        }
        let Some(msg) = driver.recv_timeout(Duration::from_millis(200)) else {
            if !driver.is_running() {
                break;
            }
            continue;
        };
        for msg in std::iter::once(msg).chain(driver.drain()) {
            match msg {
                PipelineMessage::Status(report) => {
                    tracing::info!(
                        "status {} seq={:?} rate={:.1}/s hb_lag={:?}ms",
                        report.stage,
                        report.last_seq,
                        report.rate_per_sec,
                        report.heartbeat_lag_ms
                    );
                }
                PipelineMessage::VisibleWindow(window) => {
                    tracing::debug!(
                        "window {} .. {}",
                        format_ms(window.start_ms),
                        format_ms(window.end_ms)
                    );
                }
                PipelineMessage::Stats(stats) => {
                    tracing::debug!(
                        "{} series, {} points, queue depth {}, dropped {}",
                        stats.series_count,
                        stats.total_points,
                        stats.queue.queue_depth,
                        stats.queue.total_dropped
                    );
                }
                PipelineMessage::Connection(ConnectionEvent::Terminated { error }) => {
                    tracing::error!("Feed gave up: {}", error);
                    break 'outer;
                }
                PipelineMessage::Connection(event) => tracing::debug!("connection: {:?}", event),
                PipelineMessage::Error(e) => tracing::warn!("pipeline error: {}", e),
                PipelineMessage::Shutdown => break 'outer,
            }
        }
    }

    tracing::info!("Shutting down...");
    driver.shutdown();

    let store = driver.store();
    for id in store.series_ids() {
        if let Some(stats) = store.stats(&id) {
            tracing::info!("{}: {} / {} points", id, stats.count, stats.capacity);
        }
    }
    Ok(())
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = match cli.verbose {
        0 => "info,chartfeed_rs=debug",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chartfeed.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn format_ms(ms: f64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{}ms", ms))
}
