//! Store-backed fixed-window rate limiting

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::context::RequestContext;
use crate::error::Error;
use crate::procedure::{Flow, Procedure, ProcedureRef};
use crate::reply::Reply;
use crate::schema::SchemaIssue;

/// What identifies one rate-limit bucket.
#[derive(Debug, Clone)]
pub enum RateLimitKey {
    /// One shared bucket for everyone
    Global,
    /// Bucket per value of a request header (e.g. `x-forwarded-for`)
    Header(String),
}

/// Options captured at use-site.
#[derive(Debug, Clone, garde::Validate)]
pub struct RateLimitOptions {
    /// Requests allowed per window
    #[garde(range(min = 1))]
    pub max_requests: u32,
    /// Window length in seconds
    #[garde(range(min = 1))]
    pub window_secs: u64,
    /// Bucket identity
    #[garde(skip)]
    pub key: RateLimitKey,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            key: RateLimitKey::Global,
        }
    }
}

/// Context value contributed on every allowed request.
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    /// Requests left in the current window
    pub remaining: u32,
}

/// Build the rate-limit procedure with captured options.
///
/// Counters live in the Store (fixed window, `incr` + `expire`); without a
/// configured store the check fails open with a warning so a bare
/// application keeps serving.
pub fn rate_limit(options: RateLimitOptions) -> ProcedureRef {
    Arc::new(RateLimitProcedure { options })
}

struct RateLimitProcedure {
    options: RateLimitOptions,
}

#[async_trait]
impl Procedure for RateLimitProcedure {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn validate_options(&self) -> std::result::Result<(), Vec<SchemaIssue>> {
        garde::Validate::validate(&self.options).map_err(|report| {
            report
                .iter()
                .map(|(path, error)| {
                    SchemaIssue::new(path.to_string(), error.message().to_string())
                })
                .collect()
        })
    }

    async fn call(&self, ctx: &mut RequestContext) -> crate::error::Result<Flow> {
        let store = match ctx.require_store() {
            Ok(store) => store,
            Err(Error::StoreNotConfigured) => {
                tracing::warn!("rate limiting without a store adapter, failing open");
                return Ok(Flow::Continue);
            }
            Err(e) => return Err(e),
        };

        let identity = match &self.options.key {
            RateLimitKey::Global => "global".to_string(),
            RateLimitKey::Header(name) => ctx
                .request()
                .header(name)
                .unwrap_or("unknown")
                .to_string(),
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let window = now / self.options.window_secs;
        let counter_key = format!("igniter:ratelimit:{identity}:{window}");

        let count = store.incr(&counter_key).await?;
        if count == 1 {
            store
                .expire(&counter_key, Duration::from_secs(self.options.window_secs))
                .await?;
        }
        if count > i64::from(self.options.max_requests) {
            let retry_after = self.options.window_secs - (now % self.options.window_secs);
            tracing::debug!(key = %counter_key, count, "rate limit exceeded");
            return Ok(Flow::Halt(
                Reply::too_many_requests()
                    .set_header("retry-after", &retry_after.to_string()),
            ));
        }
        let remaining = self.options.max_requests - count as u32;
        ctx.insert(RateLimitStatus { remaining });
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStore, NoopJobs, NoopTelemetry, TracingLogger};
    use crate::plugins::PluginRegistry;
    use crate::procedure::run_chain;
    use crate::request::Request;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    fn ctx_with_store(store: Arc<MemoryStore>) -> RequestContext {
        let request = Request::from_http(
            http::Request::builder()
                .uri("/api/things")
                .body(Bytes::new())
                .unwrap(),
            1024,
            None,
            CancellationToken::new(),
        );
        RequestContext::new(
            request,
            None,
            Arc::new(TracingLogger),
            Arc::new(store),
            true,
            Arc::new(NoopJobs),
            Arc::new(NoopTelemetry),
            Arc::new(PluginRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_allows_until_the_limit_then_halts() {
        let store = MemoryStore::shared();
        let procedure = rate_limit(RateLimitOptions {
            max_requests: 2,
            window_secs: 60,
            key: RateLimitKey::Global,
        });

        for expected_remaining in [1u32, 0] {
            let mut ctx = ctx_with_store(Arc::clone(&store));
            let halted = run_chain(&[Arc::clone(&procedure)], &mut ctx).await.unwrap();
            assert!(halted.is_none());
            assert_eq!(
                ctx.get::<RateLimitStatus>().unwrap().remaining,
                expected_remaining
            );
        }

        let mut ctx = ctx_with_store(Arc::clone(&store));
        let halted = run_chain(&[procedure], &mut ctx).await.unwrap().unwrap();
        assert_eq!(halted.status(), http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_fails_open_without_a_store() {
        let procedure = rate_limit(RateLimitOptions::default());
        let mut ctx = crate::context::test_support::context_for(
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
        );
        let halted = run_chain(&[procedure], &mut ctx).await.unwrap();
        assert!(halted.is_none());
    }

    #[tokio::test]
    async fn test_invalid_options_are_reported_with_the_procedure_name() {
        let procedure = rate_limit(RateLimitOptions {
            max_requests: 0,
            window_secs: 60,
            key: RateLimitKey::Global,
        });
        let mut ctx = crate::context::test_support::context_for(
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
        );
        let err = run_chain(&[procedure], &mut ctx).await.unwrap_err();
        let body = err.to_body();
        assert_eq!(body.error.code, "VALIDATION_FAILED");
        assert!(body.error.details.unwrap()["rate_limit.max_requests"].is_array());
    }

    #[tokio::test]
    async fn test_header_key_partitions_buckets() {
        let store = MemoryStore::shared();
        let procedure = rate_limit(RateLimitOptions {
            max_requests: 1,
            window_secs: 60,
            key: RateLimitKey::Header("x-client".into()),
        });

        for client in ["a", "b"] {
            let request = Request::from_http(
                http::Request::builder()
                    .uri("/api/things")
                    .header("x-client", client)
                    .body(Bytes::new())
                    .unwrap(),
                1024,
                None,
                CancellationToken::new(),
            );
            let mut ctx = RequestContext::new(
                request,
                None,
                Arc::new(TracingLogger),
                Arc::new(Arc::clone(&store)),
                true,
                Arc::new(NoopJobs),
                Arc::new(NoopTelemetry),
                Arc::new(PluginRegistry::new()),
            );
            let halted = run_chain(&[Arc::clone(&procedure)], &mut ctx).await.unwrap();
            assert!(halted.is_none(), "client {client} has its own bucket");
        }
    }
}
