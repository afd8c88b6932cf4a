//! Per-request context
//!
//! The context threads through the procedure chain into the action handler.
//! It starts as the application's base context plus the per-request scope
//! block (request, reply, adapters, plugins, timestamp) and grows as each
//! procedure contributes typed values. Values are keyed by type: the typed
//! map makes cross-procedure collisions impossible unless two procedures
//! insert the same type, in which case the later write wins and a warning is
//! logged.

use chrono::{DateTime, Utc};
use http::Extensions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::{Jobs, Logger, Store, Telemetry};
use crate::error::{Error, Result};
use crate::plugins::PluginRegistry;
use crate::realtime::StreamHandle;
use crate::reply::Reply;
use crate::request::Request;

/// Seeds the base context into a fresh request's typed map.
pub type ContextFactory = Arc<dyn Fn(&mut Extensions) + Send + Sync>;

/// Everything a procedure or handler can reach for one request.
pub struct RequestContext {
    request: Request,
    reply: Reply,
    extensions: Extensions,
    logger: Arc<dyn Logger>,
    store: Arc<dyn Store>,
    store_configured: bool,
    jobs: Arc<dyn Jobs>,
    telemetry: Arc<dyn Telemetry>,
    plugins: Arc<PluginRegistry>,
    timestamp: DateTime<Utc>,
    stream: Option<StreamHandle>,
}

impl RequestContext {
    /// Assemble the scope block for one request.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        request: Request,
        factory: Option<&ContextFactory>,
        logger: Arc<dyn Logger>,
        store: Arc<dyn Store>,
        store_configured: bool,
        jobs: Arc<dyn Jobs>,
        telemetry: Arc<dyn Telemetry>,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        let mut extensions = Extensions::new();
        if let Some(factory) = factory {
            factory(&mut extensions);
        }
        Self {
            request,
            reply: Reply::default(),
            extensions,
            logger,
            store,
            store_configured,
            jobs,
            telemetry,
            plugins,
            timestamp: Utc::now(),
            stream: None,
        }
    }

    /// The request facade.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the request facade.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The response builder accumulated so far.
    ///
    /// Procedures use this to attach cookies, headers, or revalidation
    /// intent that should survive whatever the handler returns.
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Mutable access to the accumulated response builder.
    pub fn reply_mut(&mut self) -> &mut Reply {
        &mut self.reply
    }

    pub(crate) fn take_reply(&mut self) -> Reply {
        std::mem::take(&mut self.reply)
    }

    /// A typed context value, contributed by the base context or a procedure.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Contribute a typed value to the context.
    ///
    /// Values must be `Clone` (share expensive state behind an `Arc`).
    /// Inserting a type that is already present overwrites it; that is
    /// almost always a procedure-ordering bug, so it logs a warning.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        if self.extensions.insert(value).is_some() {
            tracing::warn!(
                type_name = std::any::type_name::<T>(),
                "context value overwritten by a later procedure"
            );
        }
    }

    /// Remove a typed value.
    pub fn remove<T: Clone + Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions.remove::<T>()
    }

    /// The logger adapter.
    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// The store adapter. The default no-op store succeeds silently.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The store adapter, or `STORE_NOT_CONFIGURED` when only the built-in
    /// no-op is installed.
    pub fn require_store(&self) -> Result<&dyn Store> {
        if self.store_configured {
            Ok(self.store.as_ref())
        } else {
            Err(Error::StoreNotConfigured)
        }
    }

    /// The jobs adapter.
    pub fn jobs(&self) -> &dyn Jobs {
        self.jobs.as_ref()
    }

    /// The telemetry adapter.
    pub fn telemetry(&self) -> &dyn Telemetry {
        self.telemetry.as_ref()
    }

    /// The plugin registry.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// When the request entered the executor.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The request's abort signal.
    pub fn signal(&self) -> &CancellationToken {
        self.request.signal()
    }

    /// The stream write handle, present only on stream actions.
    pub fn stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref()
    }

    pub(crate) fn set_stream(&mut self, handle: StreamHandle) {
        self.stream = Some(handle);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::context_for;
    use super::*;
    use bytes::Bytes;

    #[derive(Clone, PartialEq, Debug)]
    struct CurrentUser {
        id: u64,
    }

    #[derive(Clone)]
    struct Tenant(String);

    fn ctx() -> RequestContext {
        context_for(
            http::Request::builder()
                .uri("/api/users")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_typed_accumulation() {
        let mut ctx = ctx();
        assert!(ctx.get::<CurrentUser>().is_none());
        ctx.insert(CurrentUser { id: 7 });
        ctx.insert(Tenant("acme".into()));
        assert_eq!(ctx.get::<CurrentUser>(), Some(&CurrentUser { id: 7 }));
        assert_eq!(ctx.get::<Tenant>().map(|t| t.0.as_str()), Some("acme"));
    }

    #[test]
    fn test_later_insert_overwrites() {
        let mut ctx = ctx();
        ctx.insert(CurrentUser { id: 1 });
        ctx.insert(CurrentUser { id: 2 });
        assert_eq!(ctx.get::<CurrentUser>(), Some(&CurrentUser { id: 2 }));
    }

    #[test]
    fn test_require_store_reports_missing_adapter() {
        let ctx = ctx();
        let err = ctx.require_store().err().unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::StoreNotConfigured);
    }

    #[test]
    fn test_base_context_factory_seeds_values() {
        let factory: ContextFactory = Arc::new(|ext| {
            ext.insert(Tenant("seeded".into()));
        });
        let request = Request::from_http(
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
            1024,
            None,
            CancellationToken::new(),
        );
        let ctx = RequestContext::new(
            request,
            Some(&factory),
            Arc::new(crate::adapters::TracingLogger),
            Arc::new(crate::adapters::NoopStore),
            false,
            Arc::new(crate::adapters::NoopJobs),
            Arc::new(crate::adapters::NoopTelemetry),
            Arc::new(PluginRegistry::new()),
        );
        assert_eq!(ctx.get::<Tenant>().map(|t| t.0.as_str()), Some("seeded"));
    }
}
