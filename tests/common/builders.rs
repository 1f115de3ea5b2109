//! Test data builders for NDJSON frames

use serde_json::{json, Value};

/// Builder for wire frames as the feed sends them
pub struct FrameBuilder {
    kind: &'static str,
    t_ms: Option<u64>,
    samples: Vec<Value>,
}

impl FrameBuilder {
    pub fn history() -> Self {
        Self::with_kind("history")
    }

    pub fn delta() -> Self {
        Self::with_kind("delta")
    }

    pub fn heartbeat() -> Self {
        Self::with_kind("heartbeat")
    }

    fn with_kind(kind: &'static str) -> Self {
        Self {
            kind,
            t_ms: None,
            samples: Vec::new(),
        }
    }

    pub fn server_time(mut self, t_ms: u64) -> Self {
        self.t_ms = Some(t_ms);
        self
    }

    pub fn tick(mut self, seq: u64, series_id: &str, t_ms: u64, price: f64) -> Self {
        self.samples.push(json!({
            "seq": seq,
            "series_id": series_id,
            "t_ms": t_ms,
            "payload": { "price": price, "volume": 1.0 }
        }));
        self
    }

    pub fn bar(mut self, seq: u64, series_id: &str, t_ms: u64, ohlc: [f64; 4]) -> Self {
        self.samples.push(json!({
            "seq": seq,
            "series_id": series_id,
            "t_ms": t_ms,
            "payload": { "o": ohlc[0], "h": ohlc[1], "l": ohlc[2], "c": ohlc[3] }
        }));
        self
    }

    pub fn scalar(mut self, seq: u64, series_id: &str, t_ms: u64, value: f64) -> Self {
        self.samples.push(json!({
            "seq": seq,
            "series_id": series_id,
            "t_ms": t_ms,
            "payload": { "value": value }
        }));
        self
    }

    pub fn marker(mut self, seq: u64, series_id: &str, t_ms: u64, tag: &str) -> Self {
        self.samples.push(json!({
            "seq": seq,
            "series_id": series_id,
            "t_ms": t_ms,
            "payload": { "kind": "signal", "tag": tag, "direction": "up" }
        }));
        self
    }

    pub fn build(self) -> String {
        let mut frame = json!({ "type": self.kind });
        if let Some(t_ms) = self.t_ms {
            frame["t_ms"] = json!(t_ms);
        }
        if !self.samples.is_empty() {
            frame["samples"] = Value::Array(self.samples);
        }
        frame.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::delta().tick(1, "ES:ticks", 10, 1.5).build();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["samples"][0]["series_id"], "ES:ticks");
    }
}
