//! Request-id tracking

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::procedure::{procedure_fn, Flow, ProcedureRef};

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A request identifier for log correlation and distributed tracing.
///
/// Generated ids use UUIDv7 for time-sortability, prefixed `req_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("req_{}", Uuid::now_v7().simple()).into())
    }

    /// Wrap an id presented by the client.
    pub fn from_header(value: &str) -> Self {
        Self(value.into())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the request-id procedure.
///
/// Reuses the client's `x-request-id` when present, otherwise generates one;
/// either way the id lands in the context and on the response header so
/// clients and logs can correlate.
pub fn request_id() -> ProcedureRef {
    procedure_fn("request_id", |ctx| {
        Box::pin(async move {
            let id = match ctx.request().header(REQUEST_ID_HEADER) {
                Some(value) => RequestId::from_header(value),
                None => RequestId::new(),
            };
            ctx.reply_mut().insert_header(REQUEST_ID_HEADER, id.as_str());
            ctx.insert(id);
            Ok(Flow::Continue)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context_for;
    use crate::procedure::run_chain;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_generates_an_id_when_absent() {
        let mut ctx = context_for(
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
        );
        run_chain(&[request_id()], &mut ctx).await.unwrap();
        let id = ctx.get::<RequestId>().unwrap();
        assert!(id.as_str().starts_with("req_"));
    }

    #[tokio::test]
    async fn test_reuses_the_client_id() {
        let mut ctx = context_for(
            http::Request::builder()
                .uri("/")
                .header(REQUEST_ID_HEADER, "req_from_client")
                .body(Bytes::new())
                .unwrap(),
        );
        run_chain(&[request_id()], &mut ctx).await.unwrap();
        assert_eq!(
            ctx.get::<RequestId>().unwrap().as_str(),
            "req_from_client"
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("req_"));
    }
}
