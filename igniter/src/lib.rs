//! # igniter
//!
//! Type-safe HTTP framework runtime: a fluent builder producing an immutable
//! application handle, middleware ("procedures") that contribute typed
//! values to a per-request context, a trie-indexed router, a response model
//! with deferred side effects, and an SSE realtime layer that drives
//! automatic client-side query revalidation.
//!
//! ## Features
//!
//! - **Typed context**: procedures extend the request context by type; the
//!   handler sees everything upstream contributed
//! - **Deferred effects**: cookies, headers, and revalidation intent commit
//!   only after the response body does
//! - **Realtime**: one SSE endpoint multiplexes revalidation frames and
//!   per-action streams, with scope-targeted delivery
//! - **Adapter seams**: Store, Jobs, Logger, and Telemetry are contracts;
//!   the core ships operational defaults
//! - **Host-agnostic core**: `Router::handle` consumes a plain
//!   `http::Request` and returns a plain response; `Server` is the thin
//!   axum adapter
//!
//! ## Example
//!
//! ```rust,no_run
//! use igniter::prelude::*;
//!
//! #[derive(Clone)]
//! struct AppContext {
//!     service_name: &'static str,
//! }
//!
//! #[tokio::main]
//! async fn main() -> igniter::error::Result<()> {
//!     init_tracing("info")?;
//!
//!     let app = Igniter::builder()
//!         .context(|| AppContext { service_name: "demo" })
//!         .config(IgniterConfig {
//!             base_path: "/api".into(),
//!             ..Default::default()
//!         })
//!         .create()?;
//!
//!     let users = Controller::new("users", "/users").action(
//!         "list",
//!         Action::query("/")
//!             .handler(|_ctx| Box::pin(async move { Ok(Json(serde_json::json!([]))) })),
//!     );
//!
//!     let router = app.router().register("users", users).mount()?;
//!     Server::new(([0, 0, 0, 0], 3000).into(), app).serve(router).await
//! }
//! ```

pub mod action;
pub mod adapters;
pub mod builder;
pub mod config;
pub mod context;
pub mod controller;
pub mod cookies;
pub mod error;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod plugins;
pub mod procedure;
pub mod realtime;
pub mod reply;
pub mod request;
pub mod router;
pub mod schema;
pub mod server;

mod executor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionBuilder, ActionKind, Validated};
    pub use crate::adapters::{
        JobOptions, JobTrigger, Jobs, LogFields, Logger, MemoryJobs, MemoryStore, NoopJobs,
        NoopLogger, NoopStore, NoopTelemetry, Store, Telemetry, TracingLogger, TracingTelemetry,
    };
    pub use crate::builder::{DocsMetadata, Igniter, IgniterBuilder};
    pub use crate::config::{IgniterConfig, OverflowPolicy, RealtimeConfig};
    pub use crate::context::RequestContext;
    pub use crate::controller::Controller;
    pub use crate::cookies::{CookieOptions, CookiePrefix};
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::health::health_controller;
    pub use crate::middleware::{rate_limit, request_id, RateLimitKey, RateLimitOptions, RequestId};
    pub use crate::observability::init_tracing;
    pub use crate::plugins::{Plugin, PluginRegistry};
    pub use crate::procedure::{procedure_fn, Flow, Procedure, ProcedureRef};
    pub use crate::realtime::{ConnectionId, RealtimeBus, StreamFrame, StreamHandle};
    pub use crate::reply::{IntoReply, Json, Reply};
    pub use crate::request::{Request, Upload};
    pub use crate::router::{HttpBody, Router, RouterBuilder};
    pub use crate::schema::{
        schema_fn, typed, typed_coercing, validated, validated_coercing, Schema, SchemaIssue,
        SchemaRef,
    };
    pub use crate::server::Server;

    // Re-export the cookie SameSite type used in CookieOptions
    pub use cookie::SameSite;

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export error handling utilities
    pub use anyhow::{self, Context as AnyhowContext};

    // Re-export time utilities
    pub use chrono::{DateTime, Utc};

    // Re-export UUID
    pub use uuid::Uuid;

    // Re-export futures utilities
    pub use futures::{future, stream, Future, Stream, StreamExt};

    // Re-export HTTP types
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
}
