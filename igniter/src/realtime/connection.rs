//! SSE connection state: identity, subscriptions, and the bounded outbound
//! queue

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};
use uuid::Uuid;

use super::frame::StreamFrame;
use crate::config::OverflowPolicy;

/// Unique identifier for an SSE connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct QueueState {
    frames: VecDeque<StreamFrame>,
    waker: Option<Waker>,
    closed: bool,
    dropped: u64,
}

/// One connected SSE client.
///
/// Holds the client's declared scope and channel sets plus the bounded
/// outbound queue. All delivery to this client is FIFO through the queue;
/// the queue is drained by the connection's response stream.
pub struct Connection {
    id: ConnectionId,
    scopes: HashSet<String>,
    channels: HashSet<String>,
    capacity: usize,
    policy: OverflowPolicy,
    queue: Mutex<QueueState>,
    on_close: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    cleaned: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        scopes: HashSet<String>,
        channels: HashSet<String>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            scopes,
            channels,
            capacity,
            policy,
            queue: Mutex::new(QueueState {
                frames: VecDeque::new(),
                waker: None,
                closed: false,
                dropped: 0,
            }),
            on_close: Mutex::new(Vec::new()),
            cleaned: AtomicBool::new(false),
        }
    }

    /// The connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Scope identifiers declared at connection time.
    pub fn scopes(&self) -> &HashSet<String> {
        &self.scopes
    }

    /// Channel subscriptions declared at connection time.
    pub fn channels(&self) -> &HashSet<String> {
        &self.channels
    }

    /// Whether any declared scope intersects the given scope list.
    pub fn in_scope(&self, scopes: &[String]) -> bool {
        scopes.iter().any(|s| self.scopes.contains(s))
    }

    /// Queue a frame for delivery. Returns `false` when the connection is
    /// closed or the frame was dropped by the overflow policy.
    ///
    /// Never suspends: overflow applies the configured policy and returns
    /// immediately.
    pub(crate) fn enqueue(&self, frame: StreamFrame) -> bool {
        let mut state = self.queue.lock().expect("connection queue lock");
        if state.closed {
            return false;
        }
        if state.frames.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    state.frames.pop_front();
                    state.dropped += 1;
                }
                OverflowPolicy::DropNewest => {
                    state.dropped += 1;
                    return false;
                }
                OverflowPolicy::Close => {
                    state.closed = true;
                    state.dropped += 1;
                    if let Some(waker) = state.waker.take() {
                        waker.wake();
                    }
                    tracing::warn!(
                        connection_id = %self.id,
                        "SSE queue overflow, closing connection per policy"
                    );
                    return false;
                }
            }
        }
        state.frames.push_back(frame);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        true
    }

    /// Poll the next frame. `Ready(None)` once closed and drained.
    pub(crate) fn poll_frame(&self, cx: &mut Context<'_>) -> Poll<Option<StreamFrame>> {
        let mut state = self.queue.lock().expect("connection queue lock");
        if let Some(frame) = state.frames.pop_front() {
            return Poll::Ready(Some(frame));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Mark closed; queued frames still drain.
    pub(crate) fn close(&self) {
        let mut state = self.queue.lock().expect("connection queue lock");
        state.closed = true;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.queue.lock().expect("connection queue lock").closed
    }

    /// Frames dropped by the overflow policy so far.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.lock().expect("connection queue lock").dropped
    }

    /// Register a cleanup callback.
    pub(crate) fn push_on_close(&self, f: Box<dyn FnOnce() + Send>) {
        let run_now = self.cleaned.load(Ordering::Acquire);
        if run_now {
            f();
        } else {
            self.on_close.lock().expect("on_close lock").push(f);
        }
    }

    /// Run cleanup callbacks exactly once, whatever the exit path.
    pub(crate) fn run_close_callbacks(&self) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.on_close.lock().expect("on_close lock"));
        for callback in callbacks {
            callback();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("scopes", &self.scopes)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn conn(capacity: usize, policy: OverflowPolicy) -> Connection {
        Connection::new(HashSet::new(), HashSet::new(), capacity, policy)
    }

    fn frame(n: u64) -> StreamFrame {
        StreamFrame::new("tick", json!({ "n": n }))
    }

    fn drain(conn: &Connection) -> Vec<StreamFrame> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut out = Vec::new();
        while let Poll::Ready(Some(f)) = conn.poll_frame(&mut cx) {
            out.push(f);
        }
        out
    }

    #[test]
    fn test_fifo_order() {
        let conn = conn(16, OverflowPolicy::DropOldest);
        for n in 0..5 {
            assert!(conn.enqueue(frame(n)));
        }
        let frames = drain(&conn);
        let ns: Vec<_> = frames.iter().map(|f| f.data["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drop_oldest_policy() {
        let conn = conn(2, OverflowPolicy::DropOldest);
        conn.enqueue(frame(0));
        conn.enqueue(frame(1));
        conn.enqueue(frame(2));
        let frames = drain(&conn);
        let ns: Vec<_> = frames.iter().map(|f| f.data["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2]);
        assert_eq!(conn.dropped_frames(), 1);
    }

    #[test]
    fn test_drop_newest_policy() {
        let conn = conn(2, OverflowPolicy::DropNewest);
        conn.enqueue(frame(0));
        conn.enqueue(frame(1));
        assert!(!conn.enqueue(frame(2)));
        let frames = drain(&conn);
        let ns: Vec<_> = frames.iter().map(|f| f.data["n"].as_u64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1]);
        assert_eq!(conn.dropped_frames(), 1);
    }

    #[test]
    fn test_close_policy_closes_connection() {
        let conn = conn(1, OverflowPolicy::Close);
        conn.enqueue(frame(0));
        assert!(!conn.enqueue(frame(1)));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_closed_connection_rejects_frames_but_drains() {
        let conn = conn(8, OverflowPolicy::DropOldest);
        conn.enqueue(frame(0));
        conn.close();
        assert!(!conn.enqueue(frame(1)));
        let frames = drain(&conn);
        assert_eq!(frames.len(), 1);
        // Fully drained and closed: stream ends
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(conn.poll_frame(&mut cx), Poll::Ready(None)));
    }

    #[test]
    fn test_close_callbacks_run_exactly_once() {
        let conn = conn(8, OverflowPolicy::DropOldest);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        conn.push_on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        conn.run_close_callbacks();
        conn.run_close_callbacks();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_registered_after_close_runs_immediately() {
        let conn = conn(8, OverflowPolicy::DropOldest);
        conn.run_close_callbacks();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        conn.push_on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_intersection() {
        let conn = Connection::new(
            ["user:1".to_string(), "tenant:7".to_string()].into(),
            HashSet::new(),
            8,
            OverflowPolicy::DropOldest,
        );
        assert!(conn.in_scope(&["user:1".to_string()]));
        assert!(conn.in_scope(&["user:2".to_string(), "tenant:7".to_string()]));
        assert!(!conn.in_scope(&["user:2".to_string()]));
    }
}
