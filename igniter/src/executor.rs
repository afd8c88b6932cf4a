//! Action executor: validate, run procedures, invoke the handler, apply
//! deferred effects
//!
//! One request, one pass: params, query, and body validate in that order
//! (deterministic, so the first reported error is pinned), the procedure
//! chain threads the context, the handler produces a reply, and effects
//! apply at the end: cookies serialize, the body commits, and only then
//! does revalidation publish. Non-stream actions race a timeout that
//! asserts the request's abort signal on expiry.

use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::action::{ActionKind, Validated};
use crate::builder::AppCore;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::procedure::run_chain;
use crate::realtime::{sse_response, StreamHandle};
use crate::reply::Reply;
use crate::request::Request;
use crate::router::{error_response, sealed_to_http, HttpBody, RouteEntry};
use crate::schema::{issues_to_error, Schema};

pub(crate) async fn execute(
    core: &Arc<AppCore>,
    route: &Arc<RouteEntry>,
    request: Request,
) -> http::Response<HttpBody> {
    let mut span = core.telemetry.start_span(
        "igniter.action",
        &[
            ("http.method", json!(route.method.as_str())),
            ("http.route", json!(route.pattern)),
            ("igniter.action", json!(route.route_key)),
        ],
    );
    let cancel = request.signal().clone();
    let mut ctx = RequestContext::new(
        request,
        core.context_factory.as_ref(),
        Arc::clone(&core.logger),
        Arc::clone(&core.store),
        core.store_configured,
        Arc::clone(&core.jobs),
        Arc::clone(&core.telemetry),
        Arc::clone(&core.plugins),
    );

    let is_stream = matches!(route.action.kind(), ActionKind::Stream);
    let stream_conn = if is_stream {
        let channel = route
            .channel
            .clone()
            .unwrap_or_else(|| route.route_key.clone());
        let conn = core
            .bus
            .register(HashSet::new(), HashSet::from([channel]))
            .await;
        ctx.set_stream(StreamHandle::new(
            Arc::clone(&core.bus),
            Arc::clone(&conn),
        ));
        Some(conn)
    } else {
        None
    };

    // Streams run until disconnect; everything else races the timeout.
    let outcome: Result<Reply> = if is_stream {
        process(route, &mut ctx).await
    } else {
        match tokio::time::timeout(core.config.timeout(), process(route, &mut ctx)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(Error::RequestTimeout {
                    timeout_ms: core.config.timeout_ms,
                })
            }
        }
    };

    let response = match outcome {
        Ok(reply) if is_stream && reply.is_stream() => {
            let conn = stream_conn.expect("stream action registered a connection");
            let base = ctx.take_reply();
            match base.finalize(core.config.cookie_secret.as_deref()) {
                Ok(sealed) => {
                    span.set_attr("http.status_code", json!(200));
                    span.set_status(true, None);
                    let mut response = sse_response(Arc::clone(&core.bus), conn, false);
                    for (name, value) in sealed.headers.iter() {
                        if !response.headers().contains_key(name) {
                            response.headers_mut().append(name.clone(), value.clone());
                        }
                    }
                    response
                }
                Err(e) => {
                    core.bus.unregister(conn.id());
                    fail(core, &mut span, &e)
                }
            }
        }
        Ok(reply) => {
            // A stream action that answered with a plain reply (e.g. an auth
            // halt) releases its connection unused.
            if let Some(conn) = &stream_conn {
                core.bus.unregister(conn.id());
            }
            let final_reply = reply.absorb(ctx.take_reply());
            match final_reply.finalize(core.config.cookie_secret.as_deref()) {
                Ok(sealed) => {
                    let status = sealed.status;
                    if !sealed.revalidate_keys.is_empty() {
                        let scopes = if sealed.scope_fns.is_empty() {
                            None
                        } else {
                            let mut union: BTreeSet<String> = BTreeSet::new();
                            for scope_fn in &sealed.scope_fns {
                                union.extend(scope_fn(&ctx));
                            }
                            Some(union.into_iter().collect::<Vec<_>>())
                        };
                        core.bus
                            .publish_revalidate(&sealed.revalidate_keys, scopes)
                            .await;
                    }
                    span.set_attr("http.status_code", json!(status.as_u16()));
                    span.set_status(!status.is_server_error(), None);
                    sealed_to_http(sealed)
                }
                Err(e) => fail(core, &mut span, &e),
            }
        }
        Err(e) => {
            if let Some(conn) = &stream_conn {
                core.bus.unregister(conn.id());
            }
            fail(core, &mut span, &e)
        }
    };
    span.end();
    response
}

async fn process(route: &Arc<RouteEntry>, ctx: &mut RequestContext) -> Result<Reply> {
    let action = &route.action;
    let params = validate_part(
        action.params_schema.as_deref(),
        "params",
        ctx.request().params_value(),
    )?;
    let query = validate_part(
        action.query_schema.as_deref(),
        "query",
        ctx.request().query_value(),
    )?;
    let body = match &action.body_schema {
        Some(schema) => {
            let raw = ctx.request().body().await?;
            validate_part(Some(schema.as_ref()), "body", raw)?
        }
        None => Value::Null,
    };
    ctx.insert(Validated {
        params,
        query,
        body,
    });

    if let Some(halt) = run_chain(&route.procedures, ctx).await? {
        return Ok(halt);
    }
    if ctx.signal().is_cancelled() {
        return Err(Error::internal("request aborted"));
    }
    (action.handler)(ctx).await
}

fn validate_part(schema: Option<&dyn Schema>, part: &str, input: Value) -> Result<Value> {
    match schema {
        Some(schema) => schema
            .parse(input)
            .map_err(|issues| issues_to_error(part, issues)),
        None => Ok(input),
    }
}

fn fail(
    core: &Arc<AppCore>,
    span: &mut Box<dyn crate::adapters::TelemetrySpan>,
    err: &Error,
) -> http::Response<HttpBody> {
    let code = err.code();
    if code.status().is_server_error() {
        let mut fields = serde_json::Map::new();
        fields.insert("code".into(), json!(code.as_str()));
        core.logger.error(&err.to_string(), Some(&fields));
    }
    span.record_exception(&err.to_string());
    span.set_attr("igniter.error_code", json!(code.as_str()));
    span.set_attr("http.status_code", json!(code.status().as_u16()));
    span.set_status(false, Some(code.as_str()));
    error_response(err)
}
