//! Procedures: reusable middleware over the request context
//!
//! A procedure either contributes typed values to the context (visible to
//! every later procedure and the handler) or halts the chain with a
//! response. Options are captured at use-site when the procedure value is
//! constructed; `validate_options` runs before the first call so option
//! mistakes surface as `VALIDATION_FAILED` naming the procedure.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::reply::Reply;
use crate::schema::{issues_to_error, SchemaIssue};

/// Outcome of one procedure invocation.
pub enum Flow {
    /// Keep going; context mutations stay
    Continue,
    /// Stop the chain; this reply becomes the action response
    Halt(Reply),
}

/// A context-producing middleware unit.
#[async_trait]
pub trait Procedure: Send + Sync {
    /// Name used in validation details and logs.
    fn name(&self) -> &str;

    /// Check the options captured at use-site.
    fn validate_options(&self) -> std::result::Result<(), Vec<SchemaIssue>> {
        Ok(())
    }

    /// Run against the request context.
    async fn call(&self, ctx: &mut RequestContext) -> Result<Flow>;
}

/// Shared procedure handle as stored on actions and controllers.
pub type ProcedureRef = Arc<dyn Procedure>;

/// Wrap a closure as a procedure.
///
/// ```rust,ignore
/// let timing = procedure_fn("timing", |ctx| {
///     Box::pin(async move {
///         ctx.insert(StartedAt(ctx.timestamp()));
///         Ok(Flow::Continue)
///     })
/// });
/// ```
pub fn procedure_fn<F>(name: impl Into<String>, f: F) -> ProcedureRef
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<Flow>> + Send + Sync + 'static,
{
    Arc::new(FnProcedure {
        name: name.into(),
        f,
    })
}

struct FnProcedure<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Procedure for FnProcedure<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<Flow>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: &mut RequestContext) -> Result<Flow> {
        (self.f)(ctx).await
    }
}

/// Run an ordered procedure chain.
///
/// Returns `Ok(Some(reply))` when a procedure halted, `Ok(None)` when the
/// whole chain ran through. Procedures run strictly sequentially on the
/// request's task; cancellation is observed between procedures.
pub(crate) async fn run_chain(
    procedures: &[ProcedureRef],
    ctx: &mut RequestContext,
) -> Result<Option<Reply>> {
    for procedure in procedures {
        if ctx.signal().is_cancelled() {
            return Err(Error::internal("request aborted"));
        }
        if let Err(issues) = procedure.validate_options() {
            return Err(issues_to_error(procedure.name(), issues));
        }
        match procedure.call(ctx).await? {
            Flow::Continue => {}
            Flow::Halt(reply) => return Ok(Some(reply)),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context_for;
    use bytes::Bytes;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq)]
    struct Step(Vec<&'static str>);

    fn recording(name: &'static str) -> ProcedureRef {
        procedure_fn(name, move |ctx| {
            Box::pin(async move {
                let mut steps = ctx.get::<Step>().cloned().unwrap_or(Step(Vec::new()));
                steps.0.push(name);
                ctx.insert(steps);
                Ok(Flow::Continue)
            })
        })
    }

    fn halting(name: &'static str) -> ProcedureRef {
        procedure_fn(name, |_ctx| {
            Box::pin(async move { Ok(Flow::Halt(Reply::unauthorized("no token"))) })
        })
    }

    fn ctx() -> RequestContext {
        context_for(
            http::Request::builder()
                .uri("/api/users")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_accumulates() {
        let mut ctx = ctx();
        let chain = vec![recording("first"), recording("second"), recording("third")];
        let halted = run_chain(&chain, &mut ctx).await.unwrap();
        assert!(halted.is_none());
        assert_eq!(
            ctx.get::<Step>().unwrap().0,
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn test_halt_skips_later_procedures() {
        let mut ctx = ctx();
        let chain = vec![recording("first"), halting("auth"), recording("after")];
        let halted = run_chain(&chain, &mut ctx).await.unwrap().unwrap();
        assert_eq!(halted.status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(ctx.get::<Step>().unwrap().0, vec!["first"]);
    }

    #[tokio::test]
    async fn test_procedure_error_propagates() {
        struct Failing;

        #[async_trait]
        impl Procedure for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            async fn call(&self, _ctx: &mut RequestContext) -> Result<Flow> {
                Err(Error::internal("boom"))
            }
        }

        let mut ctx = ctx();
        let chain: Vec<ProcedureRef> = vec![Arc::new(Failing)];
        let err = run_chain(&chain, &mut ctx).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_invalid_options_name_the_procedure() {
        struct BadOptions;

        #[async_trait]
        impl Procedure for BadOptions {
            fn name(&self) -> &str {
                "rate_limit"
            }
            fn validate_options(&self) -> std::result::Result<(), Vec<SchemaIssue>> {
                Err(vec![SchemaIssue::new("window", "must be positive")])
            }
            async fn call(&self, _ctx: &mut RequestContext) -> Result<Flow> {
                unreachable!("options are invalid")
            }
        }

        let mut ctx = ctx();
        let chain: Vec<ProcedureRef> = vec![Arc::new(BadOptions)];
        let err = run_chain(&chain, &mut ctx).await.unwrap_err();
        let body = err.to_body();
        assert_eq!(body.error.code, "VALIDATION_FAILED");
        assert_eq!(
            body.error.details.unwrap()["rate_limit.window"],
            json!(["must be positive"])
        );
    }

    #[tokio::test]
    async fn test_empty_patch_leaves_context_untouched() {
        let mut ctx = ctx();
        ctx.insert(Step(vec!["seed"]));
        let noop = procedure_fn("noop", |_ctx| Box::pin(async move { Ok(Flow::Continue) }));
        run_chain(&[noop], &mut ctx).await.unwrap();
        assert_eq!(ctx.get::<Step>().unwrap().0, vec!["seed"]);
    }
}
