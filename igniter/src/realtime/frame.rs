//! SSE frame model and wire encoding
//!
//! Standard SSE lines: `event:`, `id:`, `retry:`, `data:`, blank-line
//! terminated. `data` is always a single line of JSON; serde escapes
//! embedded newlines, so no payload can break the framing. Heartbeats are
//! comment lines starting with `:`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One server-sent event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamFrame {
    /// Event name (`event:` line)
    pub event: String,
    /// Event id for client reconnection (`id:` line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client retry hint in milliseconds (`retry:` line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ms: Option<u64>,
    /// JSON payload (`data:` line)
    pub data: Value,
}

impl StreamFrame {
    /// Create a named frame.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            id: None,
            retry_ms: None,
            data,
        }
    }

    /// Set the event id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the retry hint.
    #[must_use]
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    /// The revalidation frame: `event: revalidate`, `data: {"keys":[...]}`.
    pub fn revalidate(keys: &[String]) -> Self {
        Self::new("revalidate", serde_json::json!({ "keys": keys }))
    }

    /// Synthetic frame emitted on reconnection so the client refetches.
    pub fn reconnect() -> Self {
        Self::new("reconnect", Value::Object(Default::default()))
    }

    /// Wire encoding, blank-line terminated.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(retry) = self.retry_ms {
            out.push_str(&format!("retry: {retry}\n"));
        }
        out.push_str(&format!("event: {}\n", self.event));
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {id}\n"));
        }
        let data = serde_json::to_string(&self.data).unwrap_or_else(|_| "null".to_string());
        out.push_str(&format!("data: {data}\n\n"));
        out
    }
}

/// A heartbeat / comment line.
pub(crate) fn encode_comment(text: &str) -> String {
    format!(":{text}\n\n")
}

/// A bare `retry:` directive sent at stream start.
pub(crate) fn encode_retry(retry_ms: u64) -> String {
    format!("retry: {retry_ms}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_full_frame() {
        let frame = StreamFrame::new("notification", json!({"level": "info"}))
            .with_id("42")
            .with_retry(5000);
        assert_eq!(
            frame.encode(),
            "retry: 5000\nevent: notification\nid: 42\ndata: {\"level\":\"info\"}\n\n"
        );
    }

    #[test]
    fn test_revalidate_frame_shape() {
        let frame = StreamFrame::revalidate(&["users.list".into(), "users.get".into()]);
        assert_eq!(
            frame.encode(),
            "event: revalidate\ndata: {\"keys\":[\"users.list\",\"users.get\"]}\n\n"
        );
    }

    #[test]
    fn test_embedded_newlines_stay_escaped() {
        let frame = StreamFrame::new("message", json!({"text": "line1\nline2"}));
        let encoded = frame.encode();
        // One data line; the newline travels escaped
        assert_eq!(encoded.matches("data:").count(), 1);
        assert!(encoded.contains("line1\\nline2"));
    }

    #[test]
    fn test_comment_and_retry_lines() {
        assert_eq!(encode_comment("keepalive"), ":keepalive\n\n");
        assert_eq!(encode_retry(3000), "retry: 3000\n\n");
    }

    #[test]
    fn test_frame_round_trips_through_json() {
        let frame = StreamFrame::new("tick", json!({"n": 1})).with_id("7");
        let encoded = serde_json::to_string(&frame).unwrap();
        let decoded: StreamFrame = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }
}
