//! Telemetry adapter contract

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// A span in flight. Ended explicitly by the executor; implementations should
/// also tolerate being dropped without `end`.
pub trait TelemetrySpan: Send {
    /// Attach or overwrite an attribute.
    fn set_attr(&mut self, key: &str, value: Value);

    /// Record the span outcome.
    fn set_status(&mut self, ok: bool, message: Option<&str>);

    /// Record an exception against the span.
    fn record_exception(&mut self, message: &str);

    /// Finish the span.
    fn end(self: Box<Self>);
}

/// Telemetry contract. The executor opens exactly one span per request.
pub trait Telemetry: Send + Sync {
    /// Start a span.
    fn start_span(&self, name: &str, attrs: &[(&str, Value)]) -> Box<dyn TelemetrySpan>;
}

/// Default telemetry: spans vanish.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

struct NoopSpan;

impl TelemetrySpan for NoopSpan {
    fn set_attr(&mut self, _key: &str, _value: Value) {}
    fn set_status(&mut self, _ok: bool, _message: Option<&str>) {}
    fn record_exception(&mut self, _message: &str) {}
    fn end(self: Box<Self>) {}
}

impl Telemetry for NoopTelemetry {
    fn start_span(&self, _name: &str, _attrs: &[(&str, Value)]) -> Box<dyn TelemetrySpan> {
        Box::new(NoopSpan)
    }
}

/// Telemetry that emits span summaries as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

struct TracingSpan {
    name: String,
    attrs: serde_json::Map<String, Value>,
    ok: Option<bool>,
    started: Instant,
}

impl TelemetrySpan for TracingSpan {
    fn set_attr(&mut self, key: &str, value: Value) {
        self.attrs.insert(key.to_string(), value);
    }

    fn set_status(&mut self, ok: bool, message: Option<&str>) {
        self.ok = Some(ok);
        if let Some(message) = message {
            self.attrs
                .insert("status.message".into(), Value::String(message.into()));
        }
    }

    fn record_exception(&mut self, message: &str) {
        self.attrs
            .insert("exception".into(), Value::String(message.into()));
    }

    fn end(self: Box<Self>) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let attrs = serde_json::to_string(&self.attrs).unwrap_or_default();
        tracing::debug!(
            target: "igniter::telemetry",
            span = %self.name,
            ok = self.ok.unwrap_or(true),
            elapsed_ms,
            %attrs,
            "span finished"
        );
    }
}

impl Telemetry for TracingTelemetry {
    fn start_span(&self, name: &str, attrs: &[(&str, Value)]) -> Box<dyn TelemetrySpan> {
        let mut map = serde_json::Map::new();
        for (key, value) in attrs {
            map.insert((*key).to_string(), value.clone());
        }
        Box::new(TracingSpan {
            name: name.to_string(),
            attrs: map,
            ok: None,
            started: Instant::now(),
        })
    }
}

/// A finished span as captured by [`RecordingTelemetry`].
#[derive(Debug, Clone)]
pub struct RecordedSpan {
    /// Span name
    pub name: String,
    /// Final attribute set
    pub attrs: serde_json::Map<String, Value>,
    /// Outcome, if one was recorded
    pub ok: Option<bool>,
    /// Exceptions recorded against the span
    pub exceptions: Vec<String>,
}

/// Telemetry that captures spans in memory, for assertions in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    finished: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the finished spans.
    pub fn finished(&self) -> Vec<RecordedSpan> {
        self.finished.lock().expect("telemetry lock").clone()
    }
}

struct RecordingSpan {
    span: RecordedSpan,
    sink: Arc<Mutex<Vec<RecordedSpan>>>,
}

impl TelemetrySpan for RecordingSpan {
    fn set_attr(&mut self, key: &str, value: Value) {
        self.span.attrs.insert(key.to_string(), value);
    }

    fn set_status(&mut self, ok: bool, _message: Option<&str>) {
        self.span.ok = Some(ok);
    }

    fn record_exception(&mut self, message: &str) {
        self.span.exceptions.push(message.to_string());
    }

    fn end(self: Box<Self>) {
        self.sink
            .lock()
            .expect("telemetry lock")
            .push(self.span.clone());
    }
}

impl Telemetry for RecordingTelemetry {
    fn start_span(&self, name: &str, attrs: &[(&str, Value)]) -> Box<dyn TelemetrySpan> {
        let mut map = serde_json::Map::new();
        for (key, value) in attrs {
            map.insert((*key).to_string(), value.clone());
        }
        Box::new(RecordingSpan {
            span: RecordedSpan {
                name: name.to_string(),
                attrs: map,
                ok: None,
                exceptions: Vec::new(),
            },
            sink: Arc::clone(&self.finished),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_telemetry_captures_attrs() {
        let telemetry = RecordingTelemetry::new();
        let mut span = telemetry.start_span("igniter.action", &[("http.method", json!("GET"))]);
        span.set_attr("http.status_code", json!(200));
        span.set_status(true, None);
        span.end();

        let spans = telemetry.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].attrs["http.method"], json!("GET"));
        assert_eq!(spans[0].attrs["http.status_code"], json!(200));
        assert_eq!(spans[0].ok, Some(true));
    }

    #[test]
    fn test_noop_span_tolerates_full_lifecycle() {
        let telemetry = NoopTelemetry;
        let mut span = telemetry.start_span("x", &[]);
        span.set_attr("k", json!(1));
        span.record_exception("boom");
        span.end();
    }
}
