//! SSE response streams and the reserved realtime endpoint
//!
//! Every SSE response drains one connection's queue, interleaving heartbeat
//! comments so intermediaries keep the connection open. Cleanup runs on
//! every exit path: the stream's drop guard unregisters the connection,
//! which closes the queue and fires `on_close` callbacks exactly once.

use bytes::Bytes;
use futures::Stream;
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::bus::RealtimeBus;
use super::connection::Connection;
use super::frame::{encode_comment, encode_retry, StreamFrame};
use crate::request::Request;
use crate::router::HttpBody;

pub(crate) struct SseStream {
    bus: Arc<RealtimeBus>,
    conn: Arc<Connection>,
    heartbeat: tokio::time::Interval,
    pending: VecDeque<Bytes>,
    done: bool,
}

impl Stream for SseStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(bytes) = this.pending.pop_front() {
            return Poll::Ready(Some(Ok(bytes)));
        }
        if this.done {
            return Poll::Ready(None);
        }
        match this.conn.poll_frame(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(Bytes::from(frame.encode())))),
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.heartbeat.poll_tick(cx).is_ready() {
                    Poll::Ready(Some(Ok(Bytes::from(encode_comment("keepalive")))))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        self.bus.unregister(self.conn.id());
    }
}

/// Build the SSE response for a registered connection.
///
/// Emits the `retry:` default first and, when the client presented a
/// `Last-Event-ID`, a synthetic `reconnect` frame so its SDK refetches
/// whatever it missed while away.
pub(crate) fn sse_response(
    bus: Arc<RealtimeBus>,
    conn: Arc<Connection>,
    reconnect: bool,
) -> http::Response<HttpBody> {
    let config = bus.config().clone();
    let mut pending = VecDeque::new();
    pending.push_back(Bytes::from(encode_retry(config.retry_ms)));
    if reconnect {
        pending.push_back(Bytes::from(StreamFrame::reconnect().encode()));
    }
    let heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat(),
        config.heartbeat(),
    );
    let stream = SseStream {
        bus,
        conn,
        heartbeat,
        pending,
        done: false,
    };
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "text/event-stream")
        .header(http::header::CACHE_CONTROL, "no-cache, no-transform")
        .header(http::header::CONNECTION, "keep-alive")
        .body(HttpBody::Stream(Box::pin(stream)))
        .expect("static SSE response headers are valid")
}

/// Handle `GET {base_path}/__realtime__`.
///
/// Scope and channel declarations arrive as comma-separated query params;
/// `Last-Event-ID` marks a reconnection.
pub(crate) async fn handle_realtime(
    bus: &Arc<RealtimeBus>,
    request: &Request,
) -> http::Response<HttpBody> {
    let scopes = split_csv(request.query("scopes"));
    let channels = split_csv(request.query("channels"));
    let reconnect = request.header("last-event-id").is_some();
    let conn = bus.register(scopes, channels).await;
    tracing::debug!(
        connection_id = %conn.id(),
        scopes = conn.scopes().len(),
        channels = conn.channels().len(),
        reconnect,
        "realtime client connected"
    );
    sse_response(Arc::clone(bus), conn, reconnect)
}

fn split_csv(raw: Option<&str>) -> HashSet<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
