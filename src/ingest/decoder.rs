//! Frame decoding
//!
//! The default wire format is newline-delimited JSON. Each frame is either an
//! envelope
//!
//! ```json
//! {"type":"delta","t_ms":1700000000123,"samples":[{"seq":7,"series_id":"AAPL:ticks","t_ms":1700000000100,"payload":{"price":189.2,"volume":300}}]}
//! ```
//!
//! or a bare array of samples, which is treated as a delta. Payload shapes:
//! `{"value"}`, `{"price","volume"?}`, `{"o","h","l","c"}` and
//! `{"kind","tag","direction"}`.

use crate::error::{FeedError, Result};
use crate::types::{MarkerDirection, Payload, Sample, SampleBatch};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Backfill sent right after (re)connecting
    History,
    /// Incremental update
    Delta,
    /// Keep-alive without samples
    Heartbeat,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::History => write!(f, "history"),
            FrameKind::Delta => write!(f, "delta"),
            FrameKind::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub kind: FrameKind,
    pub samples: SampleBatch,
    /// Sender clock at emission, when present
    pub server_time_ms: Option<u64>,
}

/// Turns raw transport frames into sample batches
pub trait FrameDecoder: Send {
    /// Decode one frame. A failed frame is counted and reported as [`FeedError::Decode`].
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedFrame>;

    /// Frames that failed to decode so far
    fn decode_errors(&self) -> u64;
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedFrame> {
        (**self).decode(bytes)
    }

    fn decode_errors(&self) -> u64 {
        (**self).decode_errors()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Bar { o: f64, h: f64, l: f64, c: f64 },
    Tick { price: f64, volume: Option<f64> },
    Marker {
        kind: String,
        tag: String,
        #[serde(default)]
        direction: MarkerDirection,
    },
    Scalar { value: f64 },
}

impl From<WirePayload> for Payload {
    fn from(wire: WirePayload) -> Self {
        match wire {
            WirePayload::Bar { o, h, l, c } => Payload::Bar {
                open: o,
                high: h,
                low: l,
                close: c,
            },
            WirePayload::Tick { price, volume } => Payload::Tick { price, volume },
            WirePayload::Marker {
                kind,
                tag,
                direction,
            } => Payload::Marker {
                kind,
                tag,
                direction,
            },
            WirePayload::Scalar { value } => Payload::Scalar { value },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSample {
    seq: u64,
    series_id: String,
    t_ms: u64,
    payload: WirePayload,
}

impl From<WireSample> for Sample {
    fn from(wire: WireSample) -> Self {
        Sample::new(wire.seq, wire.series_id, wire.t_ms, wire.payload.into())
    }
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    samples: Vec<WireSample>,
    #[serde(default)]
    t_ms: Option<u64>,
}

/// NDJSON decoder
#[derive(Debug, Default)]
pub struct JsonFrameDecoder {
    decode_errors: u64,
}

impl JsonFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> Result<DecodedFrame> {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .ok_or_else(|| FeedError::Decode("empty frame".into()))?;

        let frame = if bytes[start] == b'[' {
            let samples: Vec<WireSample> = serde_json::from_slice(bytes)
                .map_err(|e| FeedError::Decode(format!("bad sample array: {}", e)))?;
            WireFrame {
                kind: FrameKind::Delta,
                samples,
                t_ms: None,
            }
        } else {
            serde_json::from_slice(bytes)
                .map_err(|e| FeedError::Decode(format!("bad frame: {}", e)))?
        };

        if frame.samples.iter().any(|s| s.series_id.is_empty()) {
            return Err(FeedError::Decode("sample with empty series_id".into()));
        }
        Ok(DecodedFrame {
            kind: frame.kind,
            samples: frame.samples.into_iter().map(Sample::from).collect(),
            server_time_ms: frame.t_ms,
        })
    }
}

impl FrameDecoder for JsonFrameDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedFrame> {
        Self::parse(bytes).inspect_err(|_| self.decode_errors += 1)
    }

    fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}
