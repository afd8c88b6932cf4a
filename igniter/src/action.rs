//! Actions: the endpoint unit
//!
//! An action is a query (GET), a mutation (configurable write method), or a
//! stream (long-lived SSE). All three share schemas, procedures, and a
//! handler; the kind decides the HTTP method, default status, and whether
//! the executor switches into stream mode. Kinds are a tagged union, not a
//! hierarchy.

use futures::future::BoxFuture;
use http::Method;
use serde_json::Value;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::procedure::ProcedureRef;
use crate::reply::{IntoReply, Reply};
use crate::schema::SchemaRef;

/// What kind of endpoint an action is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Read: always GET
    Query,
    /// Write: POST by default, any of POST/PUT/PATCH/DELETE
    Mutation(Method),
    /// Long-lived SSE response: GET
    Stream,
}

impl ActionKind {
    /// The HTTP method this kind answers to.
    pub fn method(&self) -> Method {
        match self {
            Self::Query | Self::Stream => Method::GET,
            Self::Mutation(method) => method.clone(),
        }
    }
}

pub(crate) type BoxHandler = Arc<
    dyn for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<Reply>> + Send + Sync,
>;

/// A fully-specified action, as held by the router.
pub struct Action {
    pub(crate) name: Option<String>,
    pub(crate) path: String,
    pub(crate) description: Option<String>,
    pub(crate) kind: ActionKind,
    pub(crate) procedures: Vec<ProcedureRef>,
    pub(crate) params_schema: Option<SchemaRef>,
    pub(crate) query_schema: Option<SchemaRef>,
    pub(crate) body_schema: Option<SchemaRef>,
    pub(crate) channel: Option<String>,
    pub(crate) handler: BoxHandler,
}

impl Action {
    /// Start a query action.
    pub fn query(path: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(ActionKind::Query, path)
    }

    /// Start a mutation action (POST unless overridden).
    pub fn mutation(path: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(ActionKind::Mutation(Method::POST), path)
    }

    /// Start a stream action.
    pub fn stream(path: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(ActionKind::Stream, path)
    }

    /// The action kind.
    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// The action's path segment, joined under the controller path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Docs name, when one was set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Docs description, when one was set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("procedures", &self.procedures.len())
            .finish_non_exhaustive()
    }
}

/// Builder for an [`Action`].
pub struct ActionBuilder {
    kind: ActionKind,
    path: String,
    name: Option<String>,
    description: Option<String>,
    procedures: Vec<ProcedureRef>,
    params_schema: Option<SchemaRef>,
    query_schema: Option<SchemaRef>,
    body_schema: Option<SchemaRef>,
    channel: Option<String>,
    handler: Option<BoxHandler>,
}

impl ActionBuilder {
    fn new(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            name: None,
            description: None,
            procedures: Vec::new(),
            params_schema: None,
            query_schema: None,
            body_schema: None,
            channel: None,
            handler: None,
        }
    }

    /// Human-readable name for docs.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Description for docs.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the mutation method.
    ///
    /// Ignored for queries and streams, which are always GET.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        if let ActionKind::Mutation(m) = &mut self.kind {
            *m = method;
        }
        self
    }

    /// Append a procedure to this action's chain.
    #[must_use]
    pub fn use_procedure(mut self, procedure: ProcedureRef) -> Self {
        self.procedures.push(procedure);
        self
    }

    /// Schema for route params.
    #[must_use]
    pub fn params_schema(mut self, schema: SchemaRef) -> Self {
        self.params_schema = Some(schema);
        self
    }

    /// Schema for the query string.
    #[must_use]
    pub fn query_schema(mut self, schema: SchemaRef) -> Self {
        self.query_schema = Some(schema);
        self
    }

    /// Schema for the request body.
    #[must_use]
    pub fn body_schema(mut self, schema: SchemaRef) -> Self {
        self.body_schema = Some(schema);
        self
    }

    /// Override the pub/sub channel of a stream action.
    ///
    /// Defaults to the action's fully-qualified route key at mount time.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Install the handler.
    ///
    /// The handler returns anything implementing [`IntoReply`]: a [`Reply`]
    /// for full control, or `Json<T>` / `serde_json::Value` which wrap into
    /// a 200 success.
    #[must_use]
    pub fn handler<F, R>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<R>>
            + Send
            + Sync
            + 'static,
        R: IntoReply + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.map(IntoReply::into_reply) })
        }));
        self
    }

    pub(crate) fn build(self) -> Result<Action> {
        let handler = self.handler.ok_or_else(|| {
            Error::config_invalid(format!("action at {:?} has no handler", self.path))
        })?;
        Ok(Action {
            name: self.name,
            path: self.path,
            description: self.description,
            kind: self.kind,
            procedures: self.procedures,
            params_schema: self.params_schema,
            query_schema: self.query_schema,
            body_schema: self.body_schema,
            channel: self.channel,
            handler,
        })
    }
}

/// Validated inputs for the current request, contributed by the executor
/// after schema validation and before the procedure chain runs.
#[derive(Debug, Clone, Default)]
pub struct Validated {
    /// Route params after the params schema (raw projection when absent)
    pub params: Value,
    /// Query after the query schema (raw projection when absent)
    pub query: Value,
    /// Body after the body schema; `Null` when no body schema is declared
    pub body: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Json;
    use serde_json::json;

    #[test]
    fn test_kind_methods() {
        assert_eq!(ActionKind::Query.method(), Method::GET);
        assert_eq!(ActionKind::Stream.method(), Method::GET);
        assert_eq!(
            ActionKind::Mutation(Method::DELETE).method(),
            Method::DELETE
        );
    }

    #[test]
    fn test_builder_requires_handler() {
        let err = Action::query("/users").build().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_mutation_method_override() {
        let action = Action::mutation("/users/:id")
            .method(Method::PUT)
            .handler(|_ctx| Box::pin(async move { Ok(Reply::no_content()) }))
            .build()
            .unwrap();
        assert_eq!(action.kind.method(), Method::PUT);
    }

    #[test]
    fn test_method_override_is_ignored_for_queries() {
        let action = Action::query("/users")
            .method(Method::POST)
            .handler(|_ctx| Box::pin(async move { Ok(Json(json!([]))) }))
            .build()
            .unwrap();
        assert_eq!(action.kind.method(), Method::GET);
    }
}
