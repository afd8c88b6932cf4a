//! Fluent application builder
//!
//! Stages accumulate configuration and adapters; `create()` validates and
//! freezes everything into an [`Igniter`] handle. Stage methods move the
//! builder, so each call returns a refined value and the frozen application
//! shares no mutable state with anything. Only the last call for a given
//! adapter slot is retained; stage order is irrelevant apart from `create`
//! being terminal.

use http::Extensions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::{
    Jobs, Logger, NoopJobs, NoopStore, NoopTelemetry, Store, Telemetry, TracingLogger,
};
use crate::config::IgniterConfig;
use crate::context::ContextFactory;
use crate::error::Result;
use crate::plugins::{Plugin, PluginRegistry};
use crate::procedure::ProcedureRef;
use crate::realtime::RealtimeBus;
use crate::router::RouterBuilder;

/// API documentation metadata carried on the application.
///
/// Rendering (OpenAPI and friends) happens in external tooling; the core
/// only stores what it is given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocsMetadata {
    /// API title
    pub title: Option<String>,
    /// API description
    pub description: Option<String>,
    /// API version string
    pub version: Option<String>,
}

/// Frozen application state shared by routers and handlers.
pub(crate) struct AppCore {
    pub(crate) config: IgniterConfig,
    pub(crate) context_factory: Option<ContextFactory>,
    pub(crate) global_procedures: Vec<ProcedureRef>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) store_configured: bool,
    pub(crate) jobs: Arc<dyn Jobs>,
    pub(crate) telemetry: Arc<dyn Telemetry>,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) docs: DocsMetadata,
    pub(crate) bus: Arc<RealtimeBus>,
}

/// The immutable application handle produced by [`IgniterBuilder::create`].
///
/// Cheap to clone; every clone shares the same frozen core.
#[derive(Clone)]
pub struct Igniter {
    pub(crate) core: Arc<AppCore>,
}

impl Igniter {
    /// Start building an application.
    #[must_use]
    pub fn builder() -> IgniterBuilder {
        IgniterBuilder::new()
    }

    /// The frozen configuration.
    pub fn config(&self) -> &IgniterConfig {
        &self.core.config
    }

    /// Start registering controllers into a router.
    #[must_use]
    pub fn router(&self) -> RouterBuilder {
        RouterBuilder::new(Arc::clone(&self.core))
    }

    /// The jobs adapter.
    pub fn jobs(&self) -> &dyn Jobs {
        self.core.jobs.as_ref()
    }

    /// The store adapter.
    pub fn store(&self) -> &dyn Store {
        self.core.store.as_ref()
    }

    /// The realtime bus owned by this application.
    pub fn bus(&self) -> &Arc<RealtimeBus> {
        &self.core.bus
    }

    /// Documentation metadata.
    pub fn docs(&self) -> &DocsMetadata {
        &self.core.docs
    }

    /// Drain realtime connections, for graceful shutdown.
    pub fn shutdown(&self) {
        self.core.bus.shutdown();
    }
}

impl std::fmt::Debug for Igniter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Igniter")
            .field("config", &self.core.config)
            .finish_non_exhaustive()
    }
}

/// Stage-based builder for [`Igniter`].
pub struct IgniterBuilder {
    config: Option<IgniterConfig>,
    context_factory: Option<ContextFactory>,
    middleware: Vec<ProcedureRef>,
    store: Option<Arc<dyn Store>>,
    logger: Option<Arc<dyn Logger>>,
    jobs: Option<Arc<dyn Jobs>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    plugins: PluginRegistry,
    docs: DocsMetadata,
}

impl IgniterBuilder {
    fn new() -> Self {
        Self {
            config: None,
            context_factory: None,
            middleware: Vec::new(),
            store: None,
            logger: None,
            jobs: None,
            telemetry: None,
            plugins: PluginRegistry::new(),
            docs: DocsMetadata::default(),
        }
    }

    /// Install the base context factory.
    ///
    /// The factory runs once per request; its value seeds the typed context
    /// before any procedure.
    #[must_use]
    pub fn context<T, F>(mut self, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.context_factory = Some(Arc::new(move |ext: &mut Extensions| {
            ext.insert(factory());
        }));
        self
    }

    /// Global procedures applied to every action, ahead of controller and
    /// action procedures.
    #[must_use]
    pub fn middleware(mut self, procedures: Vec<ProcedureRef>) -> Self {
        self.middleware = procedures;
        self
    }

    /// Runtime configuration. Defaults apply when omitted.
    #[must_use]
    pub fn config(mut self, config: IgniterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Install a store adapter.
    #[must_use]
    pub fn store<S: Store + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Install a logger adapter.
    #[must_use]
    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Install a jobs adapter.
    #[must_use]
    pub fn jobs<J: Jobs + 'static>(mut self, jobs: J) -> Self {
        self.jobs = Some(Arc::new(jobs));
        self
    }

    /// Install a telemetry adapter.
    #[must_use]
    pub fn telemetry<T: Telemetry + 'static>(mut self, telemetry: T) -> Self {
        self.telemetry = Some(Arc::new(telemetry));
        self
    }

    /// Register a plugin.
    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Attach documentation metadata.
    #[must_use]
    pub fn docs(mut self, docs: DocsMetadata) -> Self {
        self.docs = docs;
        self
    }

    /// Validate and freeze into an [`Igniter`].
    ///
    /// With a store adapter installed and a Tokio runtime running, the
    /// realtime bus bridges to the store's pub/sub so revalidations cross
    /// process boundaries.
    pub fn create(self) -> Result<Igniter> {
        let config = match self.config {
            Some(config) => config,
            None => IgniterConfig::default(),
        };
        config.validate()?;

        let store_configured = self.store.is_some();
        let store: Arc<dyn Store> = self.store.unwrap_or_else(|| Arc::new(NoopStore));
        let bus = RealtimeBus::new(config.realtime.clone());

        if store_configured {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let bus = Arc::clone(&bus);
                    let store = Arc::clone(&store);
                    handle.spawn(async move {
                        if let Err(e) = bus.bridge_store(store).await {
                            tracing::warn!("realtime store bridge failed: {e}");
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        "no async runtime at create(); realtime store bridge disabled"
                    );
                }
            }
        }

        let core = AppCore {
            config,
            context_factory: self.context_factory,
            global_procedures: self.middleware,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            store,
            store_configured,
            jobs: self.jobs.unwrap_or_else(|| Arc::new(NoopJobs)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
            plugins: Arc::new(self.plugins),
            docs: self.docs,
            bus,
        };
        Ok(Igniter {
            core: Arc::new(core),
        })
    }
}

impl Default for IgniterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;

    #[derive(Clone)]
    struct AppContext {
        greeting: &'static str,
    }

    #[test]
    fn test_minimal_build() {
        let app = Igniter::builder().create().unwrap();
        assert_eq!(app.config().base_path, "/");
        assert_eq!(app.config().timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_config_fails_at_create() {
        let err = Igniter::builder()
            .config(IgniterConfig {
                base_path: "api".into(),
                ..Default::default()
            })
            .create()
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_adapter_slots_retain_the_last_call() {
        let app = Igniter::builder()
            .store(MemoryStore::shared())
            .store(MemoryStore::shared())
            .context(|| AppContext { greeting: "hello" })
            .create()
            .unwrap();
        // Configured store replaces the no-op
        app.store().set("k", "v", None).await.unwrap();
        assert_eq!(app.store().get("k").await.unwrap(), Some("v".to_string()));
        let _ = app.config();
    }

    #[tokio::test]
    async fn test_jobs_default_refuses_enqueue() {
        let app = Igniter::builder().create().unwrap();
        let err = app
            .jobs()
            .enqueue("q", "t", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::JobsNotConfigured);
    }
}
