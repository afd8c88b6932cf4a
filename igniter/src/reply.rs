//! Response builder with deferred side effects
//!
//! A [`Reply`] accumulates status, headers, cookie operations, body, and
//! revalidation intent. Nothing touches the wire until the executor applies
//! deferred effects: cookies serialize to `Set-Cookie`, the body commits per
//! negotiated content type, and revalidation publishes only after the body
//! committed successfully. A failed mutation must never trigger refetches.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::cookies::{serialize_set_cookie, CookieOp, CookieOptions};
use crate::error::{Error, Result};

/// Produces scope identifiers for a revalidation, from the request context.
pub type ScopeFn = Arc<dyn Fn(&RequestContext) -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone)]
enum ReplyBody {
    None,
    Json(Value),
    Text(String),
    Raw { bytes: Bytes, content_type: String },
}

/// The response under construction for one request.
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    cookie_ops: Vec<CookieOp>,
    body: ReplyBody,
    revalidate_keys: BTreeSet<String>,
    scope_fns: Vec<ScopeFn>,
    stream: bool,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookie_ops: Vec::new(),
            body: ReplyBody::None,
            revalidate_keys: BTreeSet::new(),
            scope_fns: Vec::new(),
            stream: false,
        }
    }
}

impl Reply {
    /// 200 with a JSON body.
    pub fn success<T: Serialize>(data: T) -> Self {
        Self::json_with_status(StatusCode::OK, data)
    }

    /// 201 with a JSON body.
    pub fn created<T: Serialize>(data: T) -> Self {
        Self::json_with_status(StatusCode::CREATED, data)
    }

    /// 204, no body.
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            ..Default::default()
        }
    }

    /// 400 with the taxonomy body.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_error(&Error::validation(message, Value::Object(Default::default())))
    }

    /// 401 with the taxonomy body.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::from_error(&Error::Unauthorized(message.into()))
    }

    /// 403 with the taxonomy body.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::from_error(&Error::Forbidden(message.into()))
    }

    /// 404 with the taxonomy body.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_error(&Error::NotFound(message.into()))
    }

    /// 409 with the taxonomy body.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::from_error(&Error::Conflict(message.into()))
    }

    /// 429 with the taxonomy body.
    pub fn too_many_requests() -> Self {
        Self::from_error(&Error::TooManyRequests)
    }

    /// 422 with field details.
    pub fn unprocessable(message: impl Into<String>, details: Value) -> Self {
        Self::from_error(&Error::unprocessable(message, details))
    }

    /// 500 with the generic taxonomy body.
    pub fn error(message: impl Into<String>) -> Self {
        Self::from_error(&Error::internal(message))
    }

    /// Plain text body, 200.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Text(body.into()),
            ..Default::default()
        }
    }

    /// Raw bytes with an explicit content type.
    pub fn raw(bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            body: ReplyBody::Raw {
                bytes,
                content_type: content_type.into(),
            },
            ..Default::default()
        }
    }

    /// Marker reply selecting SSE stream mode; only valid on stream actions.
    pub fn stream() -> Self {
        Self {
            stream: true,
            ..Default::default()
        }
    }

    /// The taxonomy response for a framework error.
    pub fn from_error(err: &Error) -> Self {
        let mut reply = Self {
            status: err.status(),
            ..Default::default()
        };
        if let Error::MethodNotAllowed { allowed } = err {
            let value = allowed
                .iter()
                .map(http::Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&value) {
                reply.headers.insert(http::header::ALLOW, value);
            }
        }
        reply.body = ReplyBody::Json(
            serde_json::to_value(err.to_body()).unwrap_or(Value::Null),
        );
        reply
    }

    fn json_with_status<T: Serialize>(status: StatusCode, data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                status,
                body: ReplyBody::Json(value),
                ..Default::default()
            },
            Err(e) => {
                tracing::error!("failed to serialize response body: {e}");
                Self::from_error(&Error::internal(e.to_string()))
            }
        }
    }

    /// Override the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Append or override a response header.
    #[must_use]
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Append or override a response header through a mutable reference.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let Ok(name) = name.parse::<HeaderName>() else {
            tracing::warn!(header = name, "invalid response header name, skipped");
            return;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            tracing::warn!(header = %name, "invalid response header value, skipped");
            return;
        };
        self.headers.insert(name, value);
    }

    /// Record a cookie write. Prefix constraint violations fail here, at set
    /// time, not at emission.
    pub fn set_cookie(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        options: CookieOptions,
    ) -> Result<Self> {
        self.add_cookie(name, value, options)?;
        Ok(self)
    }

    /// Record a cookie write through a mutable reference.
    pub fn add_cookie(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        options: CookieOptions,
    ) -> Result<()> {
        let op = CookieOp::Set {
            name: name.into(),
            value: value.into(),
            options,
        };
        // Validate prefix rules now; signing still happens at emission.
        check_cookie_shape(&op)?;
        self.cookie_ops.push(op);
        Ok(())
    }

    /// Record a cookie removal.
    pub fn clear_cookie(
        mut self,
        name: impl Into<String>,
        options: CookieOptions,
    ) -> Result<Self> {
        let op = CookieOp::Clear {
            name: name.into(),
            options,
        };
        check_cookie_shape(&op)?;
        self.cookie_ops.push(op);
        Ok(self)
    }

    /// Record revalidation intent for the given query keys.
    ///
    /// Additive across calls; keys deduplicate with set semantics.
    #[must_use]
    pub fn revalidate<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_revalidate(keys);
        self
    }

    /// Record revalidation intent through a mutable reference.
    pub fn add_revalidate<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.revalidate_keys.extend(keys.into_iter().map(Into::into));
    }

    /// Record scoped revalidation intent. Scope functions compose by union.
    #[must_use]
    pub fn revalidate_scoped<I, S, F>(mut self, keys: I, scope: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&RequestContext) -> Vec<String> + Send + Sync + 'static,
    {
        self.revalidate_keys.extend(keys.into_iter().map(Into::into));
        self.scope_fns.push(Arc::new(scope));
        self
    }

    /// Whether this reply selected stream mode.
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// The current status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Recorded revalidation keys, deduplicated and ordered.
    pub fn revalidate_keys(&self) -> &BTreeSet<String> {
        &self.revalidate_keys
    }

    /// Absorb effects accumulated on a base reply (the per-request builder
    /// procedures may have touched) into this one. Own status and body win;
    /// headers, cookie operations, and revalidation intent are unioned.
    #[must_use]
    pub fn absorb(mut self, base: Reply) -> Self {
        let mut headers = base.headers;
        let mut last_name: Option<HeaderName> = None;
        for (name, value) in self.headers.drain() {
            if name.is_some() {
                last_name = name;
            }
            if let Some(name) = &last_name {
                headers.append(name.clone(), value);
            }
        }
        self.headers = headers;
        let mut cookie_ops = base.cookie_ops;
        cookie_ops.append(&mut self.cookie_ops);
        self.cookie_ops = cookie_ops;
        self.revalidate_keys.extend(base.revalidate_keys);
        self.scope_fns.extend(base.scope_fns);
        self
    }

    /// Apply deferred effects and seal the reply.
    ///
    /// Consumes the builder: after this point no further mutation is
    /// possible, which is what makes a post-commit `RESPONSE_SEALED` a
    /// stream-handle-only concern.
    pub fn finalize(self, cookie_secret: Option<&str>) -> Result<Sealed> {
        let mut headers = self.headers;
        for op in &self.cookie_ops {
            let header = serialize_set_cookie(op, cookie_secret)?;
            let value = HeaderValue::from_str(&header)
                .map_err(|e| Error::internal(format!("unserializable cookie: {e}")))?;
            headers.append(http::header::SET_COOKIE, value);
        }

        let (body, content_type) = match self.body {
            ReplyBody::None => (Bytes::new(), None),
            ReplyBody::Json(value) => {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| Error::internal(e.to_string()))?;
                (Bytes::from(bytes), Some("application/json".to_string()))
            }
            ReplyBody::Text(text) => (Bytes::from(text), Some("text/plain; charset=utf-8".to_string())),
            ReplyBody::Raw { bytes, content_type } => (bytes, Some(content_type)),
        };
        if let Some(content_type) = content_type {
            if !headers.contains_key(http::header::CONTENT_TYPE) {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_str(&content_type)
                        .map_err(|e| Error::internal(e.to_string()))?,
                );
            }
        }

        Ok(Sealed {
            status: self.status,
            headers,
            body,
            revalidate_keys: self.revalidate_keys.into_iter().collect(),
            scope_fns: self.scope_fns,
            stream: self.stream,
        })
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("status", &self.status)
            .field("revalidate_keys", &self.revalidate_keys)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// A sealed response: effects applied, body committed, nothing mutable left.
pub struct Sealed {
    /// Final status
    pub status: StatusCode,
    /// Final headers, `Set-Cookie` included
    pub headers: HeaderMap,
    /// Committed body bytes
    pub body: Bytes,
    /// Deduplicated revalidation keys, in order
    pub revalidate_keys: Vec<String>,
    /// Scope functions to evaluate against the request context
    pub scope_fns: Vec<ScopeFn>,
    /// Whether the executor should switch to SSE stream mode
    pub stream: bool,
}

/// JSON wrapper marking a serializable handler return value.
pub struct Json<T>(pub T);

/// Conversion from handler return values into a [`Reply`].
pub trait IntoReply {
    /// Perform the conversion.
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply {
        Reply::success(self)
    }
}

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> Reply {
        Reply::success(self.0)
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Reply::no_content()
    }
}

fn check_cookie_shape(op: &CookieOp) -> Result<()> {
    // Serialize against a throwaway secret so prefix violations surface at
    // set time even for signed cookies.
    match op {
        CookieOp::Set { options, .. } | CookieOp::Clear { options, .. }
            if options.signed =>
        {
            serialize_set_cookie(op, Some("")).map(|_| ())
        }
        _ => serialize_set_cookie(op, None).map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookiePrefix;
    use serde_json::json;

    #[test]
    fn test_success_commits_json() {
        let sealed = Reply::success(json!({"ok": true})).finalize(None).unwrap();
        assert_eq!(sealed.status, StatusCode::OK);
        assert_eq!(sealed.body.as_ref(), br#"{"ok":true}"#);
        assert_eq!(
            sealed.headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_text_negotiates_plain() {
        let sealed = Reply::text("pong").finalize(None).unwrap();
        assert_eq!(
            sealed.headers.get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(sealed.body.as_ref(), b"pong");
    }

    #[test]
    fn test_no_content_has_empty_body() {
        let sealed = Reply::no_content().finalize(None).unwrap();
        assert_eq!(sealed.status, StatusCode::NO_CONTENT);
        assert!(sealed.body.is_empty());
        assert!(sealed.headers.get("content-type").is_none());
    }

    #[test]
    fn test_revalidate_deduplicates() {
        let reply = Reply::success(json!({}))
            .revalidate(["users.list", "users.get"])
            .revalidate(["users.list"]);
        assert_eq!(
            reply.revalidate_keys().iter().collect::<Vec<_>>(),
            ["users.get", "users.list"]
        );
    }

    #[test]
    fn test_scope_fns_compose_by_union() {
        let reply = Reply::success(json!({}))
            .revalidate_scoped(["a"], |_| vec!["user:1".to_string()])
            .revalidate_scoped(["b"], |_| vec!["user:2".to_string()]);
        let sealed = reply.finalize(None).unwrap();
        assert_eq!(sealed.scope_fns.len(), 2);
        assert_eq!(sealed.revalidate_keys, vec!["a", "b"]);
    }

    #[test]
    fn test_cookie_prefix_violation_fails_at_set_time() {
        let err = Reply::success(json!({}))
            .set_cookie(
                "sid",
                "v",
                CookieOptions {
                    prefix: Some(CookiePrefix::Host),
                    domain: Some("example.com".into()),
                    secure: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_cookies_become_set_cookie_headers() {
        let sealed = Reply::no_content()
            .set_cookie("a", "1", CookieOptions::default())
            .unwrap()
            .set_cookie("b", "2", CookieOptions::default())
            .unwrap()
            .finalize(None)
            .unwrap();
        let values: Vec<_> = sealed
            .headers
            .get_all(http::header::SET_COOKIE)
            .iter()
            .collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_absorb_unions_effects() {
        let base = Reply::default()
            .set_header("x-request-id", "r1")
            .revalidate(["users.list"]);
        let reply = Reply::created(json!({"id": 1}))
            .revalidate(["users.get"])
            .absorb(base);
        assert_eq!(reply.status(), StatusCode::CREATED);
        assert_eq!(
            reply.revalidate_keys().iter().collect::<Vec<_>>(),
            ["users.get", "users.list"]
        );
        let sealed = reply.finalize(None).unwrap();
        assert_eq!(sealed.headers.get("x-request-id").unwrap(), "r1");
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let reply = Reply::from_error(&Error::MethodNotAllowed {
            allowed: vec![http::Method::GET, http::Method::POST],
        });
        let sealed = reply.finalize(None).unwrap();
        assert_eq!(sealed.headers.get(http::header::ALLOW).unwrap(), "GET, POST");
        assert_eq!(sealed.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_error_bodies_use_taxonomy_shape() {
        let sealed = Reply::unauthorized("missing token").finalize(None).unwrap();
        let body: Value = serde_json::from_slice(&sealed.body).unwrap();
        assert_eq!(body["error"]["code"], json!("UNAUTHORIZED"));
    }
}
