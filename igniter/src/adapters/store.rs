//! Store adapter contract
//!
//! Key-value operations plus pub/sub. A distributed implementation (e.g.
//! Redis-backed) makes realtime revalidation span processes: the bus
//! subscribes to a shared channel on startup and re-publishes received
//! messages to local connections. Without one, realtime works within a
//! single process only.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Callback invoked with each message published to a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by [`Store::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a cancellation closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Explicitly unsubscribe.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Key-value store + pub/sub contract.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically increment a counter, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set or refresh a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Publish a message to a channel.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Subscribe to a channel; the handler runs for every published message.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// List the members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

/// Default store installed when no adapter is configured.
///
/// Every operation succeeds and stores nothing; pub/sub delivers to nobody.
/// Code that genuinely needs a configured store should go through
/// `RequestContext::require_store`, which reports `STORE_NOT_CONFIGURED`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl Store for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn incr(&self, _key: &str) -> Result<i64> {
        Ok(0)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _channel: &str, _handler: MessageHandler) -> Result<Subscription> {
        Ok(Subscription::noop())
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<()> {
        Ok(())
    }

    async fn srem(&self, _key: &str, _member: &str) -> Result<()> {
        Ok(())
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_store_is_silent() {
        let store = NoopStore;
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.smembers("s").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_subscription_cancel_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
