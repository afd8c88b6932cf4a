//! In-process store for development, tests, and single-node deployments

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::store::{MessageHandler, Store, Subscription};
use crate::error::{Error, Result};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

/// Store backed by process memory.
///
/// TTLs are enforced lazily on access. Pub/sub delivers synchronously to
/// handlers registered in the same process, which is exactly the guarantee
/// the realtime bus needs for single-node operation.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, BTreeSet<String>>,
    subscribers: DashMap<String, Vec<(u64, MessageHandler)>>,
    next_subscriber: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc`, the shape the builder consumes.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read_live(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.live() {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }
}

#[async_trait]
impl Store for Arc<MemoryStore> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_live(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_live(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if !entry.live() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| Error::internal(format!("key {key:?} holds a non-integer value")))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let handlers: Vec<MessageHandler> = self
            .subscribers
            .get(channel)
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(message);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        let store = Arc::clone(self);
        let channel = channel.to_string();
        Ok(Subscription::new(move || {
            if let Some(mut subs) = store.subscribers.get_mut(&channel) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        }))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryStore::shared();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expires_lazily() {
        let store = MemoryStore::shared();
        store
            .set("k", "v", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr() {
        let store = MemoryStore::shared();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        store.set("s", "abc", None).await.unwrap();
        assert!(store.incr("s").await.is_err());
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::shared();
        store.sadd("tags", "a").await.unwrap();
        store.sadd("tags", "b").await.unwrap();
        store.sadd("tags", "a").await.unwrap();
        assert_eq!(store.smembers("tags").await.unwrap(), vec!["a", "b"]);
        store.srem("tags", "a").await.unwrap();
        assert_eq!(store.smembers("tags").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_pubsub_delivery_and_unsubscribe() {
        let store = MemoryStore::shared();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = store
            .subscribe(
                "events",
                Arc::new(move |_msg| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        store.publish("events", "one").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        sub.unsubscribe();
        store.publish("events", "two").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
