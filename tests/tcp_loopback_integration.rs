//! Loopback tests for the TCP transport
//!
//! A local listener plays the feed. Tests are serialized since they bind
//! sockets and spawn reader threads.

mod common;

use chartfeed_rs::clock::SystemClock;
use chartfeed_rs::config::PipelineConfig;
use chartfeed_rs::pipeline::{StatusStage, StreamPipeline};
use chartfeed_rs::transport::{TcpTransport, Transport, TransportError, TransportEvent};
use chartfeed_rs::ConnectionState;
use common::builders::FrameBuilder;
use serial_test::serial;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn config() -> PipelineConfig {
    PipelineConfig {
        initial_delay_ms: 50,
        max_delay_ms: 200,
        jitter_ratio: 0.0,
        ..Default::default()
    }
    .with_route("*:ticks", "price")
}

/// Run frames until `done` holds or the test timeout passes
fn run_until<F>(pipeline: &mut StreamPipeline<TcpTransport>, mut done: F) -> bool
where
    F: FnMut(&mut StreamPipeline<TcpTransport>) -> bool,
{
    let deadline = Instant::now() + common::test_timeout();
    while Instant::now() < deadline {
        pipeline.run_frame();
        if done(pipeline) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Poll the transport until it reports something or the test timeout passes
fn next_event(transport: &mut TcpTransport) -> Option<TransportEvent> {
    let deadline = Instant::now() + common::test_timeout();
    while Instant::now() < deadline {
        if let Some(event) = transport.poll_event() {
            return Some(event);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

#[test]
#[serial]
fn test_tcp_feed_to_store() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (received_tx, received_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let frames = [
            FrameBuilder::history()
                .tick(1, "ES:ticks", 1_000, 4500.0)
                .tick(2, "ES:ticks", 2_000, 4500.25)
                .build(),
            FrameBuilder::heartbeat().build(),
            FrameBuilder::delta().tick(3, "ES:ticks", 3_000, 4500.5).build(),
        ];
        for frame in frames {
            writeln!(socket, "{}", frame).unwrap();
        }
        let mut line = String::new();
        BufReader::new(socket.try_clone().unwrap())
            .read_line(&mut line)
            .unwrap();
        received_tx.send(line.trim_end().to_string()).unwrap();
    });

    let mut pipeline =
        StreamPipeline::new(config(), TcpTransport::new(), SystemClock::shared()).unwrap();
    pipeline.start();
    pipeline.open(&address);

    assert!(run_until(&mut pipeline, |p| p
        .store()
        .stats("ES:ticks")
        .is_some_and(|s| s.count == 3)));
    let status = pipeline.status();
    assert_eq!(status.stage, StatusStage::Delta);
    assert_eq!(status.last_seq, Some(3));
    assert_eq!(pipeline.stats().heartbeats, 1);

    assert!(pipeline.send(b"subscribe NQ"));
    assert_eq!(
        received_rx.recv_timeout(common::test_timeout()).unwrap(),
        "subscribe NQ"
    );
    server.join().unwrap();

    // Server hung up after reading; we should notice and start reconnecting
    assert!(run_until(&mut pipeline, |p| p.connection().retry_count > 0));
    pipeline.close();
    assert_eq!(pipeline.connection().state, ConnectionState::Closed);
}

#[test]
#[serial]
fn test_refused_connection_schedules_retry() {
    let address = free_address();

    let mut pipeline =
        StreamPipeline::new(config(), TcpTransport::new(), SystemClock::shared()).unwrap();
    pipeline.open(&address);
    assert!(run_until(&mut pipeline, |p| p.connection().state
        == ConnectionState::Reconnecting));

    let snapshot = pipeline.connection();
    assert_eq!(snapshot.state, ConnectionState::Reconnecting);
    assert!(snapshot.last_error.is_some());
    assert_eq!(pipeline.status().stage, StatusStage::Connecting);

    assert!(run_until(&mut pipeline, |p| p.connection().retry_count >= 2));
    pipeline.close();
}

#[test]
#[serial]
fn test_connect_returns_before_outcome() {
    let address = free_address();
    let mut transport = TcpTransport::new();

    transport.connect(&address).unwrap();
    assert!(!transport.is_open());
    assert!(transport.is_pending());

    match next_event(&mut transport) {
        Some(TransportEvent::Closed(Some(err))) => {
            assert!(matches!(err, TransportError::Refused(_)), "{:?}", err);
            assert!(err.is_transient());
        }
        other => panic!("expected a refused connect, got {:?}", other),
    }
    assert!(!transport.is_pending());
}

#[test]
#[serial]
fn test_oversized_line_is_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let heartbeat = FrameBuilder::heartbeat().build();
    let expected = heartbeat.clone().into_bytes();

    let server = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let junk = vec![b'x'; 16 * 1024];
        for _ in 0..4 {
            socket.write_all(&junk).unwrap();
        }
        write!(socket, "\n{}\n", heartbeat).unwrap();
        socket.flush().unwrap();
        // Hold the connection until the client goes away
        let mut byte = [0u8; 1];
        let _ = socket.read(&mut byte);
    });

    let mut transport = TcpTransport::new().with_max_frame_bytes(1024);
    transport.connect(&address).unwrap();
    assert_eq!(next_event(&mut transport), Some(TransportEvent::Opened));
    assert!(transport.is_open());
    assert_eq!(
        next_event(&mut transport),
        Some(TransportEvent::Frame(expected))
    );

    transport.close();
    server.join().unwrap();
}
