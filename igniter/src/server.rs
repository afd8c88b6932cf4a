//! Axum host adapter
//!
//! The core never binds a socket itself; this thin adapter converts the
//! host request into the core's request value, hands it to `Router::handle`,
//! and converts the result back. Cross-cutting host concerns (panic
//! recovery, request tracing, CORS preflight) live here as tower layers,
//! not in the core. Stopping is graceful: signals stop the accept loop,
//! in-flight requests finish, then the realtime bus drains.

use axum::extract::State;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::builder::Igniter;
use crate::error::{Error, Result};
use crate::router::{error_response, HttpBody, Router};

/// Server instance
pub struct Server {
    addr: SocketAddr,
    app: Igniter,
    cors: CorsLayer,
}

impl Server {
    /// Create a server for the given application.
    pub fn new(addr: SocketAddr, app: Igniter) -> Self {
        Self {
            addr,
            app,
            cors: CorsLayer::permissive(),
        }
    }

    /// Replace the CORS layer (restrictive by passing `CorsLayer::new()`).
    #[must_use]
    pub fn with_cors(mut self, cors: CorsLayer) -> Self {
        self.cors = cors;
        self
    }

    /// Run the server with the given router until SIGINT/SIGTERM.
    pub async fn serve(self, router: Router) -> Result<()> {
        let shared = Arc::new(router);
        let service = axum::Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&shared))
            .layer(self.cors)
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::new());

        let listener = TcpListener::bind(&self.addr).await?;
        tracing::info!("igniter listening on {}", self.addr);

        axum::serve(listener, service)
            .with_graceful_shutdown(wait_for_stop())
            .await?;

        // In-flight requests have finished; drain the SSE side too so every
        // connection runs its cleanup callbacks before the process exits
        self.app.shutdown();
        tracing::info!("igniter stopped");
        Ok(())
    }
}

async fn dispatch(
    State(router): State<Arc<Router>>,
    req: axum::extract::Request,
) -> axum::response::Response {
    let limit = router.config().body_limit_bytes;
    let (parts, body) = req.into_parts();
    // Read one byte past the limit so the core can tell at-limit from over
    let bytes = match axum::body::to_bytes(body, limit.saturating_add(1)).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let response = error_response(&Error::PayloadTooLarge { limit_bytes: limit });
            return into_axum(response);
        }
    };
    let request = http::Request::from_parts(parts, bytes);
    into_axum(router.handle(request).await)
}

fn into_axum(response: http::Response<HttpBody>) -> axum::response::Response {
    let (parts, body) = response.into_parts();
    let body = match body {
        HttpBody::Full(bytes) => axum::body::Body::from(bytes),
        HttpBody::Stream(stream) => axum::body::Body::from_stream(stream),
    };
    axum::response::Response::from_parts(parts, body)
}

/// Resolve once the process is asked to stop.
///
/// Resolving hands control back to `serve`, which stops accepting new
/// requests, lets in-flight ones finish, and drains the realtime bus.
async fn wait_for_stop() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM stream is always available on unix");
        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("ctrl-c: stopping, draining realtime connections"),
            _ = sigterm.recv() => tracing::info!("SIGTERM: stopping, draining realtime connections"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        tracing::info!("ctrl-c: stopping, draining realtime connections");
    }
}
