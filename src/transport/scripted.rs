//! Scripted in-memory transport for tests and demos
//!
//! [`ScriptedTransport`] is driven from the outside through a cloned
//! [`ScriptedTransportHandle`]: queue connect failures, inject frames, drop the
//! connection, and inspect what was sent.
//!
//! # Example
//!
//! ```ignore
//! let transport = ScriptedTransport::new();
//! let handle = transport.handle();
//! handle.fail_next_connects(2, TransportError::Refused("down".into()));
//! handle.push_frame(br#"{"type":"delta","samples":[]}"#);
//! ```

use super::{Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ScriptedState {
    open: bool,
    connect_failures: VecDeque<TransportError>,
    pending: VecDeque<TransportEvent>,
    sent: Vec<Vec<u8>>,
    connect_attempts: u32,
    last_address: Option<String>,
    close_calls: u32,
}

/// Scripted in-memory transport
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptedState>>,
}

/// Control handle shared with a [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct ScriptedTransportHandle {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for scripting this transport
    pub fn handle(&self) -> ScriptedTransportHandle {
        ScriptedTransportHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl ScriptedTransportHandle {
    /// Make the next `count` connect attempts fail with `error`
    pub fn fail_next_connects(&self, count: usize, error: TransportError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.connect_failures.push_back(error.clone());
        }
    }

    /// Inject one inbound frame
    pub fn push_frame(&self, bytes: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .pending
            .push_back(TransportEvent::Frame(bytes.into()));
    }

    /// Simulate the connection breaking. Frames queued before this call are
    /// still delivered first.
    pub fn drop_connection(&self, reason: Option<TransportError>) {
        self.state
            .lock()
            .pending
            .push_back(TransportEvent::Closed(reason));
    }

    /// Frames written through [`Transport::send`]
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Number of connect calls so far
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Address passed to the most recent connect call
    pub fn last_address(&self) -> Option<String> {
        self.state.lock().last_address.clone()
    }

    /// Number of close calls so far
    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    /// Whether the transport currently reports an open connection
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        state.last_address = Some(address.to_string());
        if let Some(err) = state.connect_failures.pop_front() {
            state.open = false;
            return Err(err);
        }
        state.open = true;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(bytes.to_vec());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let mut state = self.state.lock();
        if !state.open {
            return None;
        }
        let event = state.pending.pop_front()?;
        if matches!(event, TransportEvent::Closed(_)) {
            state.open = false;
        }
        Some(event)
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_connect_failures() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.handle();
        handle.fail_next_connects(1, TransportError::Refused("down".into()));

        assert!(transport.connect("feed:1").is_err());
        assert!(transport.connect("feed:1").is_ok());
        assert_eq!(handle.connect_attempts(), 2);
        assert_eq!(handle.last_address().as_deref(), Some("feed:1"));
    }

    #[test]
    fn test_frames_then_close() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.handle();
        transport.connect("x").unwrap();

        handle.push_frame(b"a".to_vec());
        handle.drop_connection(None);

        assert_eq!(transport.poll_event(), Some(TransportEvent::Frame(b"a".to_vec())));
        assert_eq!(transport.poll_event(), Some(TransportEvent::Closed(None)));
        assert!(!transport.is_open());
        assert_eq!(transport.poll_event(), None);
    }

    #[test]
    fn test_send_records_frames() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.handle();
        assert_eq!(transport.send(b"x"), Err(TransportError::NotConnected));
        transport.connect("x").unwrap();
        transport.send(b"ping").unwrap();
        assert_eq!(handle.sent_frames(), vec![b"ping".to_vec()]);
    }
}
