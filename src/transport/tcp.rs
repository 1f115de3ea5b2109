//! TCP transport with newline-delimited frames
//!
//! `connect` checks the address syntax and returns at once; a worker thread
//! resolves the address, connects with a bounded timeout and then reads the
//! stream. Everything the worker observes (the open socket, frames, the end
//! of the connection) reaches the owner through a bounded crossbeam channel,
//! so `poll_event` never blocks.
//!
//! Frames are split on `\n` by [`LineFramer`], which never buffers more than
//! the frame limit: an oversized line is skipped up to the next newline.

use super::{Transport, TransportError, TransportEvent};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames longer than this are discarded by the reader
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Worker → owner channel capacity. The worker blocks when full, which pushes
/// backpressure onto the socket.
const FRAME_CHANNEL_CAPACITY: usize = 4096;

/// How often a blocked read wakes up to notice `close`
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

const INITIAL_LINE_CAPACITY: usize = 1024;

/// One unit produced by [`LineFramer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framed {
    /// A complete frame, delimiter stripped
    Frame(Vec<u8>),
    /// A line over the limit was skipped; carries its length
    Oversized(usize),
}

/// Incremental newline splitter with a hard size limit
///
/// State survives read errors, so a read timeout in the middle of a line
/// resumes where it stopped on the next call.
#[derive(Debug)]
pub struct LineFramer {
    max_frame_bytes: usize,
    line: Vec<u8>,
    /// Bytes skipped so far while inside an oversized line
    discarding: Option<usize>,
}

impl LineFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            line: Vec::with_capacity(INITIAL_LINE_CAPACITY.min(max_frame_bytes)),
            discarding: None,
        }
    }

    /// Next frame from `reader`. `Ok(None)` at end of stream.
    ///
    /// Empty lines are skipped. A trailing partial line at end of stream is
    /// returned as a frame.
    pub fn next_frame<R: BufRead>(&mut self, reader: &mut R) -> io::Result<Option<Framed>> {
        loop {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                if let Some(skipped) = self.discarding.take() {
                    return Ok(Some(Framed::Oversized(skipped)));
                }
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(self.finish_line());
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let chunk_len = newline.unwrap_or(available.len());
            if let Some(skipped) = self.discarding.as_mut() {
                *skipped += chunk_len;
            } else if self.line.len() + chunk_len > self.max_frame_bytes {
                self.discarding = Some(self.line.len() + chunk_len);
                self.line.clear();
                self.line.shrink_to(INITIAL_LINE_CAPACITY);
            } else {
                self.line.extend_from_slice(&available[..chunk_len]);
            }
            reader.consume(chunk_len + newline.map_or(0, |_| 1));

            if newline.is_none() {
                continue;
            }
            if let Some(skipped) = self.discarding.take() {
                return Ok(Some(Framed::Oversized(skipped)));
            }
            if let Some(frame) = self.finish_line() {
                return Ok(Some(frame));
            }
        }
    }

    fn finish_line(&mut self) -> Option<Framed> {
        while matches!(self.line.last(), Some(b'\r')) {
            self.line.pop();
        }
        if self.line.is_empty() {
            return None;
        }
        Some(Framed::Frame(std::mem::take(&mut self.line)))
    }
}

/// What the worker thread hands to the owner
enum WorkerMessage {
    /// Connected; the owner keeps this handle for writes and shutdown
    Connected(TcpStream),
    Event(TransportEvent),
}

/// Check `host:port` syntax without touching the network
fn validate_address(address: &str) -> Result<(), TransportError> {
    if address.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    let invalid = || TransportError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

/// Resolve a syntactically valid address. Lookup failures are transient.
fn resolve(address: &str) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|e| TransportError::Unresolved(format!("{}: {}", address, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Unresolved(format!(
            "{}: no addresses",
            address
        )));
    }
    Ok(addrs)
}

fn connect_stream(address: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in resolve(address)? {
        tracing::debug!("TCP connecting to {}", addr);
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(TransportError::from(e)),
        }
    }
    Err(last_error.unwrap_or_else(|| TransportError::Unresolved(address.to_string())))
}

struct Worker {
    address: String,
    connect_timeout: Duration,
    max_frame_bytes: usize,
    tx: Sender<WorkerMessage>,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let stream = match connect_stream(&self.address, self.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = self
                    .tx
                    .send(WorkerMessage::Event(TransportEvent::Closed(Some(e))));
                return;
            }
        };
        let owner_stream = match stream
            .try_clone()
            .and_then(|s| stream.set_read_timeout(Some(READ_POLL_INTERVAL)).map(|_| s))
        {
            Ok(s) => s,
            Err(e) => {
                let _ = self
                    .tx
                    .send(WorkerMessage::Event(TransportEvent::Closed(Some(e.into()))));
                return;
            }
        };
        if self.cancelled.load(Ordering::Acquire)
            || self.tx.send(WorkerMessage::Connected(owner_stream)).is_err()
        {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        self.read_loop(stream);
        tracing::trace!("TCP worker for {} exiting", self.address);
    }

    fn read_loop(&self, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut framer = LineFramer::new(self.max_frame_bytes);
        loop {
            let event = match framer.next_frame(&mut reader) {
                Ok(Some(Framed::Frame(bytes))) => TransportEvent::Frame(bytes),
                Ok(Some(Framed::Oversized(len))) => {
                    tracing::warn!("Discarding oversized frame ({} bytes)", len);
                    continue;
                }
                Ok(None) => TransportEvent::Closed(None),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if self.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => TransportEvent::Closed(Some(e.into())),
            };
            let done = matches!(event, TransportEvent::Closed(_));
            // Send fails once the owner has closed or reconnected
            if self.tx.send(WorkerMessage::Event(event)).is_err() || done {
                return;
            }
        }
    }
}

pub struct TcpTransport {
    connect_timeout: Duration,
    max_frame_bytes: usize,
    stream: Option<TcpStream>,
    events_rx: Option<Receiver<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    /// A connect was started and its outcome has not been polled yet
    pending: bool,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_frame_bytes: MAX_FRAME_BYTES,
            stream: None,
            events_rx: None,
            worker: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            pending: false,
        }
    }

    /// Override the frame size limit
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes.max(1);
        self
    }

    /// Whether a connect attempt is still in flight
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        self.close();
        validate_address(address)?;

        let (tx, rx) = bounded(FRAME_CHANNEL_CAPACITY);
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            address: address.to_string(),
            connect_timeout: self.connect_timeout,
            max_frame_bytes: self.max_frame_bytes,
            tx,
            cancelled: cancelled.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("chartfeed-tcp".to_string())
            .spawn(move || worker.run())?;

        self.worker = Some(handle);
        self.events_rx = Some(rx);
        self.cancelled = cancelled;
        self.pending = true;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes)?;
        if bytes.last() != Some(&b'\n') {
            stream.write_all(b"\n")?;
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let rx = self.events_rx.as_ref()?;
        match rx.try_recv() {
            Ok(WorkerMessage::Connected(stream)) => {
                self.pending = false;
                self.stream = Some(stream);
                Some(TransportEvent::Opened)
            }
            Ok(WorkerMessage::Event(event)) => {
                if matches!(event, TransportEvent::Closed(_)) {
                    self.pending = false;
                    self.stream = None;
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.events_rx = None;
                let was_live = self.stream.take().is_some();
                if was_live || std::mem::take(&mut self.pending) {
                    Some(TransportEvent::Closed(Some(TransportError::ConnectionLost(
                        "worker thread ended".to_string(),
                    ))))
                } else {
                    None
                }
            }
        }
    }

    fn close(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.pending = false;
        let was_live = match self.stream.take() {
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            None => false,
        };
        // Dropping the receiver unblocks a worker stuck on a full channel
        self.events_rx = None;
        if let Some(handle) = self.worker.take() {
            // A worker still inside connect is left to finish on its own
            if was_live || handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
