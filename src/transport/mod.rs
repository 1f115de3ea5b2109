//! Duplex transport abstraction
//!
//! A [`Transport`] owns exactly one underlying connection at a time and knows
//! nothing about reconnection, backoff or decoding; that policy lives in
//! [`crate::connection::ReconnectingConnection`]. Implementations:
//!
//! - [`TcpTransport`] - newline-delimited frames over a TCP stream; connect and
//!   reads happen on a worker thread that reports through a crossbeam channel
//! - [`ScriptedTransport`] - scripted in-memory transport for tests and demos
//!
//! Transport failures are reported as [`TransportError`], which classifies
//! itself as transient (eligible for reconnect) or terminal.

pub mod scripted;
pub mod tcp;

pub use scripted::{ScriptedTransport, ScriptedTransportHandle};
pub use tcp::TcpTransport;

use thiserror::Error;

/// Errors raised by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The address cannot be parsed. Retrying will not help.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// Name lookup failed, e.g. DNS is unreachable during an outage
    #[error("address lookup failed: {0}")]
    Unresolved(String),

    /// Remote refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// Connect or IO timed out
    #[error("timed out: {0}")]
    TimedOut(String),

    /// An established connection broke
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Remote closed the connection cleanly
    #[error("closed by remote")]
    ClosedByRemote,

    /// Operation requires an open connection
    #[error("not connected")]
    NotConnected,

    /// Any other IO failure
    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether a reconnect attempt may succeed after this error
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::InvalidAddress(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => TransportError::Refused(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::TimedOut(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportError::ConnectionLost(err.to_string()),
            ErrorKind::InvalidInput => TransportError::InvalidAddress(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Something observed on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connect that returned before completing has now succeeded
    Opened,
    /// One raw frame (delimiter stripped)
    Frame(Vec<u8>),
    /// The connection ended; `None` means a clean remote close
    Closed(Option<TransportError>),
}

/// Unified interface for duplex connections
///
/// `connect` either completes before returning (`is_open` is then true) or
/// starts a background attempt whose outcome arrives from `poll_event` as
/// [`TransportEvent::Opened`] or [`TransportEvent::Closed`]. `poll_event`
/// never blocks.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Establish a connection to `address`
    fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    /// Send one frame
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Shut the connection down. Must be safe to call when not connected.
    fn close(&mut self);

    /// Whether a connection is currently established
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        (**self).connect(address)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
