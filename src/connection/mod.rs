//! Reconnecting connection state machine
//!
//! [`ReconnectingConnection`] wraps a single [`Transport`] and owns the
//! connection lifecycle:
//!
//! ```text
//!            open()                 connect ok
//!   Idle ───────────► Connecting ─────────────► Open
//!    ▲                   │  ▲                    │
//!    │ (never)   failure │  │ retry deadline     │ unexpected close / error
//!    │                   ▼  │                    ▼
//!    │               Reconnecting ◄──────────────┘
//!    │                   │
//!    │                   │ retries exhausted / terminal error
//!    │                   ▼
//!    └──────────────  Closed  ◄──── close() from any state
//! ```
//!
//! Backoff delays are deadlines checked by [`ReconnectingConnection::poll`],
//! which the host calls from its timer/frame tick. Nothing here sleeps.
//!
//! A transport may finish connecting in the background: when `connect`
//! returns `Ok` but the transport is not open yet, the connection stays in
//! `Connecting` until `poll` sees [`TransportEvent::Opened`] or a
//! [`TransportEvent::Closed`] carrying the connect error.
//!
//! `retry_count` goes back to 0 when a connection is established. An explicit
//! [`ReconnectingConnection::open`] from `Idle`/`Closed` also starts a fresh
//! retry cycle.

pub mod backoff;

pub use backoff::BackoffPolicy;

use crate::clock::SharedClock;
use crate::transport::{Transport, TransportError, TransportEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::time::Duration;

/// Upper bound on transport events consumed by a single [`ReconnectingConnection::poll`]
pub const MAX_EVENTS_PER_POLL: usize = 4096;

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never opened
    #[default]
    Idle,
    /// Connect attempt in progress
    Connecting,
    /// Connected and ready
    Open,
    /// Waiting for the backoff deadline before the next attempt
    Reconnecting,
    /// Closed by the caller, by a terminal error, or after retries ran out
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Read-only view of the connection for status displays
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub retry_count: u32,
    pub next_retry_delay_ms: Option<u32>,
    /// Live countdown until the pending retry fires
    pub next_retry_in: Option<Duration>,
    pub last_error: Option<String>,
}

/// Events produced by the connection, collected by [`ReconnectingConnection::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// State machine moved to a new state
    StateChanged(ConnectionState),
    /// Connection established (fires once per successful connect)
    Opened,
    /// Raw inbound frame
    Frame(Vec<u8>),
    /// The open connection ended unexpectedly
    Disconnected { error: String },
    /// A retry has been scheduled
    RetryScheduled { retry_count: u32, delay_ms: u32 },
    /// No more automatic retries; an explicit `open` is required
    Terminated { error: String },
}

/// Duplex connection with automatic reconnection
pub struct ReconnectingConnection<T: Transport> {
    transport: T,
    policy: BackoffPolicy,
    clock: SharedClock,
    rng: StdRng,
    state: ConnectionState,
    address: Option<String>,
    should_reconnect: bool,
    retry_count: u32,
    next_retry_delay_ms: Option<u32>,
    retry_deadline: Option<Duration>,
    last_error: Option<String>,
    events: Vec<ConnectionEvent>,
    successful_opens: u64,
}

impl<T: Transport> ReconnectingConnection<T> {
    /// Create a new connection in the `Idle` state
    pub fn new(transport: T, policy: BackoffPolicy, clock: SharedClock) -> Self {
        Self {
            transport,
            policy,
            clock,
            rng: StdRng::from_entropy(),
            state: ConnectionState::Idle,
            address: None,
            should_reconnect: false,
            retry_count: 0,
            next_retry_delay_ms: None,
            retry_deadline: None,
            last_error: None,
            events: Vec::new(),
            successful_opens: 0,
        }
    }

    /// Use a deterministic jitter source
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start (or restart) the connection cycle
    ///
    /// No-op while `Open` or `Connecting`. From `Reconnecting` the pending
    /// deadline is cancelled and an attempt is made immediately, keeping the
    /// current retry count. From `Idle`/`Closed` a fresh cycle starts.
    pub fn open(&mut self, address: &str) {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                tracing::debug!("open({}) ignored: already {}", address, self.state);
                return;
            }
            ConnectionState::Reconnecting => {
                tracing::info!("open({}) while reconnecting: retrying now", address);
                self.retry_deadline = None;
                self.next_retry_delay_ms = None;
            }
            ConnectionState::Idle | ConnectionState::Closed => {
                self.retry_count = 0;
            }
        }

        self.address = Some(address.to_string());
        self.should_reconnect = true;
        self.attempt_connect();
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed
            && !self.should_reconnect
            && self.retry_deadline.is_none()
        {
            return;
        }
        self.should_reconnect = false;
        self.retry_deadline = None;
        self.next_retry_delay_ms = None;
        self.transport.close();
        tracing::info!("Connection closed by caller");
        self.set_state(ConnectionState::Closed);
    }

    /// Send one frame. Returns false (and sends nothing) unless `Open`.
    pub fn send(&mut self, bytes: &[u8]) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        match self.transport.send(bytes) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Send failed: {}", e);
                self.handle_failure(e);
                false
            }
        }
    }

    /// Timer tick: fire a due retry, then drain transport events.
    ///
    /// Returns every event produced since the previous call, including those
    /// raised by `open`/`close`/`send`.
    pub fn poll(&mut self) -> Vec<ConnectionEvent> {
        if self.state == ConnectionState::Reconnecting {
            if let Some(deadline) = self.retry_deadline {
                if self.clock.now() >= deadline {
                    self.retry_deadline = None;
                    tracing::debug!("Retry timer fired (attempt {})", self.retry_count);
                    self.attempt_connect();
                }
            }
        }

        if self.state == ConnectionState::Connecting {
            match self.transport.poll_event() {
                Some(TransportEvent::Opened) => self.on_established(),
                Some(TransportEvent::Closed(reason)) => {
                    let error = reason.unwrap_or(TransportError::ClosedByRemote);
                    self.on_connect_failed(error);
                }
                Some(TransportEvent::Frame(_)) => {
                    tracing::warn!("Frame received before the connection opened; dropped");
                }
                None => {}
            }
        }

        if self.state == ConnectionState::Open {
            for _ in 0..MAX_EVENTS_PER_POLL {
                match self.transport.poll_event() {
                    Some(TransportEvent::Opened) => {}
                    Some(TransportEvent::Frame(bytes)) => {
                        self.events.push(ConnectionEvent::Frame(bytes));
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        let error = reason.unwrap_or(TransportError::ClosedByRemote);
                        tracing::warn!("Connection lost: {}", error);
                        self.events.push(ConnectionEvent::Disconnected {
                            error: error.to_string(),
                        });
                        self.handle_failure(error);
                        break;
                    }
                    None => break,
                }
            }
        }

        std::mem::take(&mut self.events)
    }

    /// Events raised since the last `poll`, without ticking timers
    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Time until the pending retry fires
    pub fn next_retry_in(&self) -> Option<Duration> {
        self.retry_deadline
            .map(|deadline| deadline.saturating_sub(self.clock.now()))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Address of the current cycle
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Number of successful connects over the lifetime of this connection
    pub fn successful_opens(&self) -> u64 {
        self.successful_opens
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Read-only snapshot for status displays
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            is_connected: self.state == ConnectionState::Open,
            is_connecting: matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ),
            retry_count: self.retry_count,
            next_retry_delay_ms: self.next_retry_delay_ms,
            next_retry_in: self.next_retry_in(),
            last_error: self.last_error.clone(),
        }
    }

    /// Access the transport (tests, diagnostics)
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn attempt_connect(&mut self) {
        let Some(address) = self.address.clone() else {
            return;
        };
        self.set_state(ConnectionState::Connecting);
        match self.transport.connect(&address) {
            Ok(()) if self.transport.is_open() => self.on_established(),
            Ok(()) => tracing::debug!("Connect to {} pending", address),
            Err(e) => self.on_connect_failed(e),
        }
    }

    fn on_established(&mut self) {
        tracing::info!(
            "Connected to {} (after {} retries)",
            self.address.as_deref().unwrap_or("<unknown>"),
            self.retry_count
        );
        self.retry_count = 0;
        self.next_retry_delay_ms = None;
        self.retry_deadline = None;
        self.last_error = None;
        self.successful_opens += 1;
        self.set_state(ConnectionState::Open);
        self.events.push(ConnectionEvent::Opened);
    }

    fn on_connect_failed(&mut self, error: TransportError) {
        tracing::warn!(
            "Connect to {} failed: {}",
            self.address.as_deref().unwrap_or("<unknown>"),
            error
        );
        self.handle_failure(error);
    }

    fn handle_failure(&mut self, error: TransportError) {
        self.transport.close();
        self.last_error = Some(error.to_string());

        if !self.should_reconnect {
            self.set_state(ConnectionState::Closed);
            return;
        }

        if !error.is_transient() {
            self.terminate(format!("terminal transport error: {}", error));
            return;
        }

        if self.retry_count >= self.policy.max_retries {
            self.terminate(format!(
                "giving up after {} retries: {}",
                self.retry_count, error
            ));
            return;
        }

        let delay_ms = self.policy.jittered_delay_ms(self.retry_count, &mut self.rng);
        self.retry_count += 1;
        self.next_retry_delay_ms = Some(delay_ms);
        self.retry_deadline = Some(self.clock.now() + Duration::from_millis(delay_ms as u64));
        tracing::info!(
            "Reconnect attempt {} scheduled in {} ms",
            self.retry_count,
            delay_ms
        );
        self.set_state(ConnectionState::Reconnecting);
        self.events.push(ConnectionEvent::RetryScheduled {
            retry_count: self.retry_count,
            delay_ms,
        });
    }

    fn terminate(&mut self, message: String) {
        tracing::error!("Connection terminated: {}", message);
        self.should_reconnect = false;
        self.retry_deadline = None;
        self.next_retry_delay_ms = None;
        self.last_error = Some(message.clone());
        self.set_state(ConnectionState::Closed);
        self.events.push(ConnectionEvent::Terminated { error: message });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.events.push(ConnectionEvent::StateChanged(state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::MockTransport;
    use crate::transport::{ScriptedTransport, ScriptedTransportHandle};

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            ..Default::default()
        }
    }

    fn scripted(
        max_retries: u32,
    ) -> (
        ReconnectingConnection<ScriptedTransport>,
        ScriptedTransportHandle,
        ManualClock,
    ) {
        let transport = ScriptedTransport::new();
        let handle = transport.handle();
        let clock = ManualClock::new();
        let conn = ReconnectingConnection::new(transport, policy(max_retries), clock.shared())
            .with_rng_seed(42);
        (conn, handle, clock)
    }

    #[test]
    fn test_open_success_emits_opened() {
        let (mut conn, _handle, _clock) = scripted(3);
        conn.open("feed:9000");
        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(events.contains(&ConnectionEvent::Opened));
        assert!(events.contains(&ConnectionEvent::StateChanged(ConnectionState::Connecting)));
        assert_eq!(conn.retry_count(), 0);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_open_when_open_is_noop() {
        let (mut conn, handle, _clock) = scripted(3);
        conn.open("a");
        conn.poll();
        conn.open("a");
        assert_eq!(handle.connect_attempts(), 1);
        assert!(conn.poll().is_empty());
    }

    #[test]
    fn test_send_only_when_open() {
        let (mut conn, handle, _clock) = scripted(3);
        assert!(!conn.send(b"early"));
        conn.open("a");
        assert!(conn.send(b"hello"));
        conn.close();
        assert!(!conn.send(b"late"));
        assert_eq!(handle.sent_frames(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_unexpected_close_schedules_retry_with_countdown() {
        let (mut conn, handle, clock) = scripted(5);
        conn.open("a");
        conn.poll();

        handle.drop_connection(Some(TransportError::ConnectionLost("reset".into())));
        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.retry_count(), 1);

        let delay = match events
            .iter()
            .find(|e| matches!(e, ConnectionEvent::RetryScheduled { .. }))
        {
            Some(ConnectionEvent::RetryScheduled { delay_ms, .. }) => *delay_ms,
            _ => panic!("expected a retry to be scheduled: {:?}", events),
        };
        assert!((800..=1200).contains(&delay));

        let remaining = conn.next_retry_in().unwrap();
        assert_eq!(remaining, Duration::from_millis(delay as u64));
        clock.advance_ms(300);
        assert_eq!(
            conn.next_retry_in().unwrap(),
            Duration::from_millis(delay as u64 - 300)
        );

        // Not yet due
        conn.poll();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        clock.advance_ms(delay as u64);
        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(events.contains(&ConnectionEvent::Opened));
        assert_eq!(conn.retry_count(), 0);
        assert_eq!(handle.connect_attempts(), 2);
    }

    #[test]
    fn test_retries_exhausted_goes_terminal() {
        let (mut conn, handle, clock) = scripted(2);
        handle.fail_next_connects(10, TransportError::Refused("down".into()));

        conn.open("a");
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        for _ in 0..2 {
            clock.advance_ms(60_000);
            conn.poll();
        }

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.connect_attempts(), 3);
        assert!(conn.last_error().unwrap().contains("giving up"));
        assert!(conn.next_retry_in().is_none());

        // No further automatic attempts
        clock.advance_ms(600_000);
        conn.poll();
        assert_eq!(handle.connect_attempts(), 3);

        // Explicit open restarts the cycle with a fresh retry budget
        conn.open("a");
        assert_eq!(handle.connect_attempts(), 4);
        assert_eq!(conn.retry_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_terminal_error_does_not_retry() {
        let (mut conn, handle, _clock) = scripted(5);
        handle.fail_next_connects(1, TransportError::InvalidAddress("???".into()));
        conn.open("???");
        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Terminated { .. })));
        assert_eq!(conn.retry_count(), 0);
    }

    #[test]
    fn test_close_cancels_pending_retry_and_is_idempotent() {
        let (mut conn, handle, clock) = scripted(5);
        handle.fail_next_connects(1, TransportError::Refused("down".into()));
        conn.open("a");
        assert!(conn.next_retry_in().is_some());

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.next_retry_in().is_none());
        conn.poll();

        conn.close();
        assert!(conn.poll().is_empty());

        clock.advance_ms(120_000);
        conn.poll();
        assert_eq!(handle.connect_attempts(), 1);
    }

    #[test]
    fn test_snapshot_reflects_reconnecting() {
        let (mut conn, handle, _clock) = scripted(5);
        handle.fail_next_connects(1, TransportError::TimedOut("slow".into()));
        conn.open("a");
        let snap = conn.snapshot();
        assert!(!snap.is_connected);
        assert!(snap.is_connecting);
        assert_eq!(snap.retry_count, 1);
        assert!(snap.next_retry_delay_ms.is_some());
        assert!(snap.last_error.unwrap().contains("slow"));
    }

    #[test]
    fn test_send_failure_triggers_reconnect_with_mockall() {
        let mut transport = MockTransport::new();
        transport.expect_connect().times(1).returning(|_| Ok(()));
        transport.expect_is_open().returning(|| true);
        transport
            .expect_send()
            .times(1)
            .returning(|_| Err(TransportError::ConnectionLost("broken pipe".into())));
        transport.expect_close().returning(|| ());
        transport.expect_poll_event().returning(|| None);

        let clock = ManualClock::new();
        let mut conn =
            ReconnectingConnection::new(transport, policy(3), clock.shared()).with_rng_seed(1);
        conn.open("a");
        assert!(!conn.send(b"x"));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.retry_count(), 1);
    }

    fn deferred_transport(events: Vec<TransportEvent>) -> MockTransport {
        let mut pending: std::collections::VecDeque<_> = events.into();
        let mut transport = MockTransport::new();
        transport.expect_connect().returning(|_| Ok(()));
        transport.expect_is_open().returning(|| false);
        transport.expect_close().returning(|| ());
        transport
            .expect_poll_event()
            .returning(move || pending.pop_front());
        transport
    }

    #[test]
    fn test_deferred_connect_opens_on_poll() {
        let transport = deferred_transport(vec![
            TransportEvent::Opened,
            TransportEvent::Frame(b"hello".to_vec()),
        ]);
        let clock = ManualClock::new();
        let mut conn =
            ReconnectingConnection::new(transport, policy(3), clock.shared()).with_rng_seed(1);

        conn.open("a");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.snapshot().is_connecting);
        assert!(!conn.send(b"too early"));

        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(events.contains(&ConnectionEvent::Opened));
        assert!(events.contains(&ConnectionEvent::Frame(b"hello".to_vec())));
        assert_eq!(conn.successful_opens(), 1);
    }

    #[test]
    fn test_deferred_connect_failure_schedules_retry() {
        let transport = deferred_transport(vec![TransportEvent::Closed(Some(
            TransportError::Refused("down".into()),
        ))]);
        let clock = ManualClock::new();
        let mut conn =
            ReconnectingConnection::new(transport, policy(3), clock.shared()).with_rng_seed(1);

        conn.open("a");
        let events = conn.poll();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.retry_count(), 1);
        assert!(conn.last_error().unwrap().contains("down"));
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::RetryScheduled { retry_count: 1, .. })));
        // A failed connect is not a lost connection
        assert!(!events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
    }
}
