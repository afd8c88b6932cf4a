//! The realtime bus: connection table, channel/scope indices, and delivery
//!
//! Two message types share the SSE transport: revalidation frames on the
//! reserved `__revalidate__` channel (every client), and custom frames on
//! per-action channels (stream actions). Delivery is FIFO per connection;
//! ordering across connections is not guaranteed.
//!
//! Cross-process delivery is best-effort: with a Store adapter installed the
//! bus re-publishes revalidations through the store's pub/sub and mirrors
//! received messages to local connections, skipping its own echoes by node
//! id. A message lost by the store is lost.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use super::connection::{Connection, ConnectionId};
use super::frame::StreamFrame;
use crate::adapters::{Store, Subscription};
use crate::config::RealtimeConfig;
use crate::error::{Error, Result};

/// The reserved channel carrying revalidation messages.
pub const REVALIDATE_CHANNEL: &str = "__revalidate__";

#[derive(Debug, Serialize, Deserialize)]
struct BridgeEnvelope {
    node: String,
    keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
}

/// In-memory SSE multiplexer, one per application.
pub struct RealtimeBus {
    config: RealtimeConfig,
    node_id: String,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    channel_index: DashMap<String, HashSet<ConnectionId>>,
    scope_index: DashMap<String, HashSet<ConnectionId>>,
    store: Mutex<Option<Arc<dyn Store>>>,
    revalidate_bridge: Mutex<Option<Subscription>>,
    channel_bridges: Mutex<HashMap<String, Subscription>>,
}

impl RealtimeBus {
    /// Create a bus with the given tuning.
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            node_id: uuid::Uuid::new_v4().to_string(),
            connections: DashMap::new(),
            channel_index: DashMap::new(),
            scope_index: DashMap::new(),
            store: Mutex::new(None),
            revalidate_bridge: Mutex::new(None),
            channel_bridges: Mutex::new(HashMap::new()),
        })
    }

    /// The bus tuning.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Register a connection with its declared scope and channel sets.
    pub async fn register(
        self: &Arc<Self>,
        scopes: HashSet<String>,
        channels: HashSet<String>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            scopes,
            channels,
            self.config.queue_size,
            self.config.overflow_policy,
        ));
        let id = conn.id();
        for scope in conn.scopes() {
            self.scope_index.entry(scope.clone()).or_default().insert(id);
        }
        for channel in conn.channels() {
            self.channel_index
                .entry(channel.clone())
                .or_default()
                .insert(id);
            self.ensure_channel_bridge(channel).await;
        }
        self.connections.insert(id, Arc::clone(&conn));
        tracing::debug!(connection_id = %id, "SSE connection registered");
        conn
    }

    /// Remove a connection on any exit path: normal close, client abort,
    /// handler error, or shutdown. Idempotent; cleanup callbacks run once.
    pub fn unregister(&self, id: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return;
        };
        for scope in conn.scopes() {
            if let Some(mut set) = self.scope_index.get_mut(scope) {
                set.remove(&id);
            }
        }
        self.scope_index.retain(|_, set| !set.is_empty());
        let mut emptied_channels = Vec::new();
        for channel in conn.channels() {
            if let Some(mut set) = self.channel_index.get_mut(channel) {
                set.remove(&id);
                if set.is_empty() {
                    emptied_channels.push(channel.clone());
                }
            }
        }
        for channel in &emptied_channels {
            self.channel_index.remove(channel);
            // Last local subscriber gone: drop the store bridge too
            self.channel_bridges
                .lock()
                .expect("channel bridges lock")
                .remove(channel);
        }
        conn.close();
        conn.run_close_callbacks();
        let dropped = conn.dropped_frames();
        if dropped > 0 {
            tracing::warn!(
                connection_id = %id,
                dropped,
                "SSE connection closed with dropped frames"
            );
        }
        tracing::debug!(connection_id = %id, "SSE connection unregistered");
    }

    /// Publish a revalidation: local delivery plus (best-effort) store
    /// fan-out to other nodes.
    pub async fn publish_revalidate(&self, keys: &[String], scopes: Option<Vec<String>>) {
        if keys.is_empty() {
            return;
        }
        self.deliver_revalidate(keys, scopes.as_deref());
        let store = self.store.lock().expect("store lock").clone();
        if let Some(store) = store {
            let envelope = BridgeEnvelope {
                node: self.node_id.clone(),
                keys: keys.to_vec(),
                scopes,
            };
            let payload = match serde_json::to_string(&envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("failed to encode revalidation envelope: {e}");
                    return;
                }
            };
            if let Err(e) = store.publish(REVALIDATE_CHANNEL, &payload).await {
                tracing::warn!("revalidation store publish failed (best-effort): {e}");
            }
        }
    }

    /// Deliver a revalidation frame to local connections.
    ///
    /// No scope list means broadcast. With scopes, a connection receives the
    /// frame iff its declared set intersects the list, and at most once,
    /// however many scopes match.
    pub fn deliver_revalidate(&self, keys: &[String], scopes: Option<&[String]>) {
        let frame = StreamFrame::revalidate(keys);
        match scopes {
            None => {
                for entry in self.connections.iter() {
                    entry.value().enqueue(frame.clone());
                }
            }
            Some(scopes) => {
                let mut targets: HashSet<ConnectionId> = HashSet::new();
                for scope in scopes {
                    if let Some(set) = self.scope_index.get(scope) {
                        targets.extend(set.iter().copied());
                    }
                }
                for id in targets {
                    if let Some(conn) = self.connections.get(&id) {
                        conn.enqueue(frame.clone());
                    }
                }
            }
        }
    }

    /// Fan a frame out to every local connection subscribed to a channel.
    pub fn publish_channel(&self, channel: &str, frame: StreamFrame) {
        let Some(targets) = self
            .channel_index
            .get(channel)
            .map(|set| set.iter().copied().collect::<Vec<_>>())
        else {
            return;
        };
        for id in targets {
            if let Some(conn) = self.connections.get(&id) {
                conn.enqueue(frame.clone());
            }
        }
    }

    /// Queue a frame on a single connection.
    pub fn send_to(&self, id: ConnectionId, frame: StreamFrame) -> Result<()> {
        let Some(conn) = self.connections.get(&id) else {
            return Err(Error::ResponseSealed);
        };
        if conn.is_closed() {
            return Err(Error::ResponseSealed);
        }
        conn.enqueue(frame);
        Ok(())
    }

    /// Attach a Store adapter: revalidations start flowing across processes
    /// through the shared `__revalidate__` channel.
    pub async fn bridge_store(self: &Arc<Self>, store: Arc<dyn Store>) -> Result<()> {
        *self.store.lock().expect("store lock") = Some(Arc::clone(&store));
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = store
            .subscribe(
                REVALIDATE_CHANNEL,
                Arc::new(move |message: &str| {
                    let Some(bus) = weak.upgrade() else { return };
                    match serde_json::from_str::<BridgeEnvelope>(message) {
                        Ok(envelope) if envelope.node != bus.node_id => {
                            bus.deliver_revalidate(&envelope.keys, envelope.scopes.as_deref());
                        }
                        Ok(_) => {} // own echo
                        Err(e) => {
                            tracing::warn!("malformed revalidation envelope dropped: {e}");
                        }
                    }
                }),
            )
            .await?;
        *self.revalidate_bridge.lock().expect("bridge lock") = Some(subscription);
        tracing::info!("realtime bus bridged to store pub/sub");
        Ok(())
    }

    /// Mirror a store channel into local connections, once per channel.
    async fn ensure_channel_bridge(self: &Arc<Self>, channel: &str) {
        if channel == REVALIDATE_CHANNEL {
            return;
        }
        let store = self.store.lock().expect("store lock").clone();
        let Some(store) = store else { return };
        {
            let bridges = self.channel_bridges.lock().expect("channel bridges lock");
            if bridges.contains_key(channel) {
                return;
            }
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let channel_name = channel.to_string();
        let handler_channel = channel_name.clone();
        let result = store
            .subscribe(
                channel,
                Arc::new(move |message: &str| {
                    let Some(bus) = weak.upgrade() else { return };
                    let frame = serde_json::from_str::<StreamFrame>(message)
                        .unwrap_or_else(|_| {
                            StreamFrame::new(
                                "message",
                                serde_json::Value::String(message.to_string()),
                            )
                        });
                    bus.publish_channel(&handler_channel, frame);
                }),
            )
            .await;
        match result {
            Ok(subscription) => {
                self.channel_bridges
                    .lock()
                    .expect("channel bridges lock")
                    .insert(channel_name, subscription);
            }
            Err(e) => {
                tracing::warn!(channel = %channel_name, "channel bridge subscribe failed: {e}");
            }
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection and drain state, for graceful shutdown.
    pub fn shutdown(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.unregister(id);
        }
        *self.revalidate_bridge.lock().expect("bridge lock") = None;
        self.channel_bridges
            .lock()
            .expect("channel bridges lock")
            .clear();
    }
}

impl std::fmt::Debug for RealtimeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeBus")
            .field("node_id", &self.node_id)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

/// Write handle a stream action's handler uses to emit frames.
#[derive(Clone)]
pub struct StreamHandle {
    bus: Arc<RealtimeBus>,
    conn: Arc<Connection>,
}

impl StreamHandle {
    pub(crate) fn new(bus: Arc<RealtimeBus>, conn: Arc<Connection>) -> Self {
        Self { bus, conn }
    }

    /// The underlying connection id.
    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Queue a frame for this connection.
    ///
    /// Returns immediately; a full queue applies the overflow policy. After
    /// `close` the response is sealed and sending is an error.
    pub fn send(&self, frame: StreamFrame) -> Result<()> {
        if self.conn.is_closed() {
            tracing::error!(connection_id = %self.conn.id(), "send on a sealed stream");
            return Err(Error::ResponseSealed);
        }
        self.conn.enqueue(frame);
        Ok(())
    }

    /// Close the stream and release the connection's resources.
    pub fn close(&self) {
        self.bus.unregister(self.conn.id());
    }

    /// Register a cleanup callback; runs exactly once on any exit path.
    pub fn on_close(&self, f: impl FnOnce() + Send + 'static) {
        self.conn.push_on_close(Box::new(f));
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.conn.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use futures::task::noop_waker;
    use serde_json::json;
    use std::task::{Context, Poll};

    fn scopes(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
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

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let c1 = bus.register(scopes(&["user:1"]), HashSet::new()).await;
        let c2 = bus.register(HashSet::new(), HashSet::new()).await;
        bus.deliver_revalidate(&keys(&["users.list"]), None);
        assert_eq!(drain(&c1).len(), 1);
        assert_eq!(drain(&c2).len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_delivery_requires_intersection() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let c1 = bus.register(scopes(&["user:1"]), HashSet::new()).await;
        let c2 = bus.register(scopes(&["user:2"]), HashSet::new()).await;
        let scope_list = keys(&["user:1"]);
        bus.deliver_revalidate(&keys(&["users.get"]), Some(scope_list.as_slice()));
        let got = drain(&c1);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event, "revalidate");
        assert_eq!(got[0].data, json!({"keys": ["users.get"]}));
        assert!(drain(&c2).is_empty());
    }

    #[tokio::test]
    async fn test_at_most_one_frame_even_with_multiple_matching_scopes() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let c1 = bus
            .register(scopes(&["user:1", "tenant:7"]), HashSet::new())
            .await;
        let scope_list = keys(&["user:1", "tenant:7"]);
        bus.deliver_revalidate(&keys(&["users.get"]), Some(scope_list.as_slice()));
        assert_eq!(drain(&c1).len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_clients_receive_nothing() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let c1 = bus.register(scopes(&["user:1"]), HashSet::new()).await;
        bus.unregister(c1.id());
        bus.deliver_revalidate(&keys(&["users.list"]), None);
        assert!(drain(&c1).is_empty());
        assert_eq!(bus.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_fanout() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let c1 = bus
            .register(HashSet::new(), scopes(&["chat.messages"]))
            .await;
        let c2 = bus.register(HashSet::new(), HashSet::new()).await;
        bus.publish_channel("chat.messages", StreamFrame::new("message", json!("hi")));
        assert_eq!(drain(&c1).len(), 1);
        assert!(drain(&c2).is_empty());
    }

    #[tokio::test]
    async fn test_stream_handle_seals_after_close() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let conn = bus.register(HashSet::new(), HashSet::new()).await;
        let handle = StreamHandle::new(Arc::clone(&bus), Arc::clone(&conn));
        handle
            .send(StreamFrame::new("tick", json!(1)))
            .expect("open stream accepts frames");
        handle.close();
        let err = handle.send(StreamFrame::new("tick", json!(2))).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ResponseSealed);
    }

    #[tokio::test]
    async fn test_on_close_fires_once_through_handle() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let conn = bus.register(HashSet::new(), HashSet::new()).await;
        let handle = StreamHandle::new(Arc::clone(&bus), Arc::clone(&conn));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        handle.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.close();
        bus.unregister(conn.id());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_bridge_skips_own_echo_and_mirrors_remote() {
        let store = MemoryStore::shared();
        let bus = RealtimeBus::new(RealtimeConfig::default());
        bus.bridge_store(Arc::new(Arc::clone(&store))).await.unwrap();
        let conn = bus.register(HashSet::new(), HashSet::new()).await;

        // Own publish delivers locally exactly once (echo skipped)
        bus.publish_revalidate(&keys(&["users.list"]), None).await;
        assert_eq!(drain(&conn).len(), 1);

        // A remote node's envelope arrives through the store and mirrors in
        use crate::adapters::Store as _;
        let remote = serde_json::to_string(&BridgeEnvelope {
            node: "other-node".into(),
            keys: keys(&["users.get"]),
            scopes: None,
        })
        .unwrap();
        store.publish(REVALIDATE_CHANNEL, &remote).await.unwrap();
        let frames = drain(&conn);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, json!({"keys": ["users.get"]}));
    }

    #[tokio::test]
    async fn test_store_channel_bridge_fans_out_published_messages() {
        use crate::adapters::Store as _;
        let store = MemoryStore::shared();
        let bus = RealtimeBus::new(RealtimeConfig::default());
        bus.bridge_store(Arc::new(Arc::clone(&store))).await.unwrap();
        let conn = bus
            .register(HashSet::new(), scopes(&["notifications.feed"]))
            .await;

        let frame = StreamFrame::new("notification", json!({"text": "hello"}));
        store
            .publish("notifications.feed", &serde_json::to_string(&frame).unwrap())
            .await
            .unwrap();
        let frames = drain(&conn);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "notification");

        // Non-frame payloads arrive as generic messages
        store.publish("notifications.feed", "plain text").await.unwrap();
        let frames = drain(&conn);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, json!("plain text"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_everything() {
        let bus = RealtimeBus::new(RealtimeConfig::default());
        let _c1 = bus.register(scopes(&["user:1"]), scopes(&["a"])).await;
        let _c2 = bus.register(scopes(&["user:2"]), scopes(&["b"])).await;
        bus.shutdown();
        assert_eq!(bus.connection_count(), 0);
    }
}
