//! Liveness and readiness probes
//!
//! A prebuilt controller for orchestrators that restart on failed liveness
//! and gate traffic on readiness. Register it like any other controller:
//!
//! ```rust,ignore
//! let router = app
//!     .router()
//!     .register("health", health_controller("users-service"))
//!     .mount()?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::action::Action;
use crate::controller::Controller;
use crate::reply::Reply;

/// What the liveness probe answers: the process is up and serving.
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessReport {
    /// Always `"alive"`; a dead process answers nothing at all
    pub status: String,
    /// The name given to [`health_controller`]
    pub service: String,
    /// Crate version baked in at compile time
    pub version: String,
}

/// What the readiness probe answers: whether traffic should be routed here.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// True once every probed adapter answered
    pub ready: bool,
    /// The name given to [`health_controller`]
    pub service: String,
    /// Probe outcome per adapter, keyed by adapter name
    pub checks: HashMap<String, AdapterCheck>,
}

/// Outcome of probing one adapter.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdapterCheck {
    /// The adapter answered the probe
    pub ok: bool,
    /// Extra detail, e.g. why a probe was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Build the health controller.
///
/// `GET /health` always answers 200 while the process runs (liveness).
/// `GET /ready` probes the configured adapters and answers 503 until every
/// check passes (readiness).
pub fn health_controller(service: impl Into<String>) -> Controller {
    let service = service.into();
    let live_service = service.clone();
    Controller::new("health", "/")
        .action(
            "live",
            Action::query("/health").handler(move |_ctx| {
                let service = live_service.clone();
                Box::pin(async move {
                    Ok(Reply::success(LivenessReport {
                        status: "alive".to_string(),
                        service,
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    }))
                })
            }),
        )
        .action(
            "ready",
            Action::query("/ready").handler(move |ctx| {
                let service = service.clone();
                Box::pin(async move {
                    let mut checks = HashMap::new();
                    match ctx.require_store() {
                        Ok(store) => {
                            let ok = store.get("__igniter_health__").await.is_ok();
                            checks.insert("store".to_string(), AdapterCheck { ok, note: None });
                        }
                        Err(_) => {
                            // Nothing configured means nothing to wait for
                            checks.insert(
                                "store".to_string(),
                                AdapterCheck {
                                    ok: true,
                                    note: Some("not configured".to_string()),
                                },
                            );
                        }
                    }
                    let ready = checks.values().all(|c| c.ok);
                    let reply = Reply::success(ReadinessReport {
                        ready,
                        service,
                        checks,
                    });
                    Ok(if ready {
                        reply
                    } else {
                        reply.with_status(http::StatusCode::SERVICE_UNAVAILABLE)
                    })
                })
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::builder::Igniter;
    use crate::config::IgniterConfig;
    use crate::router::HttpBody;
    use bytes::Bytes;
    use serde_json::Value;

    async fn get(router: &crate::router::Router, uri: &str) -> (u16, Value) {
        let response = router
            .handle(
                http::Request::builder()
                    .uri(uri)
                    .body(Bytes::new())
                    .unwrap(),
            )
            .await;
        let status = response.status().as_u16();
        let HttpBody::Full(bytes) = response.into_body() else {
            panic!("health endpoints buffer their bodies");
        };
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_liveness_always_answers() {
        let app = Igniter::builder().create().unwrap();
        let router = app
            .router()
            .register("health", health_controller("demo"))
            .mount()
            .unwrap();
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "alive");
        assert_eq!(body["service"], "demo");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_readiness_probes_the_store() {
        let app = Igniter::builder()
            .config(IgniterConfig::default())
            .store(MemoryStore::shared())
            .create()
            .unwrap();
        let router = app
            .router()
            .register("health", health_controller("demo"))
            .mount()
            .unwrap();
        let (status, body) = get(&router, "/ready").await;
        assert_eq!(status, 200);
        assert_eq!(body["ready"], true);
        assert_eq!(body["checks"]["store"]["ok"], true);
    }

    #[tokio::test]
    async fn test_readiness_without_store_is_ready() {
        let app = Igniter::builder().create().unwrap();
        let router = app
            .router()
            .register("health", health_controller("demo"))
            .mount()
            .unwrap();
        let (status, body) = get(&router, "/ready").await;
        assert_eq!(status, 200);
        assert_eq!(body["checks"]["store"]["note"], "not configured");
    }
}
