//! Normalized request facade
//!
//! Wraps the host request into the view handlers and procedures consume:
//! case-insensitive headers, parsed cookies, route params, a JSON projection
//! of the query string, and a body that is deserialized once on first access
//! according to its `Content-Type`.

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cookies;
use crate::error::{Error, Result};
use crate::router::normalize_path;

/// A file part captured from a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name, if any
    pub filename: Option<String>,
    /// Part content type, if any
    pub content_type: Option<String>,
    /// Raw bytes
    pub data: Bytes,
}

#[derive(Debug)]
enum ParsedBody {
    /// No body or an empty one
    Empty,
    /// `application/json`
    Json(Value),
    /// `application/x-www-form-urlencoded`
    Form(Value),
    /// `multipart/form-data`: text fields as a JSON object, file parts aside
    Multipart {
        fields: Value,
        uploads: HashMap<String, Upload>,
    },
    /// Unrecognized content type; bytes stay raw
    Raw,
}

/// Normalized view of one incoming HTTP request.
pub struct Request {
    method: Method,
    uri: Uri,
    path: String,
    params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    body_bytes: Bytes,
    parsed: OnceCell<ParsedBody>,
    body_limit_bytes: usize,
    cookie_secret: Option<String>,
    signal: CancellationToken,
}

impl Request {
    /// Build the facade from host request parts.
    ///
    /// Cookies parse once here; the body stays raw until first access.
    pub fn from_http(
        req: http::Request<Bytes>,
        body_limit_bytes: usize,
        cookie_secret: Option<String>,
        signal: CancellationToken,
    ) -> Self {
        let (parts, body_bytes) = req.into_parts();
        let path = normalize_path(parts.uri.path());
        let query = parts
            .uri
            .query()
            .map(|raw| {
                form_urlencoded::parse(raw.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        let cookies = cookies::parse_request_cookies(&parts.headers);
        Self {
            method: parts.method,
            uri: parts.uri,
            path,
            params: Vec::new(),
            query,
            headers: parts.headers,
            cookies,
            body_bytes,
            parsed: OnceCell::new(),
            body_limit_bytes,
            cookie_secret,
            signal,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The full request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Route parameters, filled in by the router after matching.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// A single route parameter.
    ///
    /// Linear scan; routes carry one to three params in practice.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// Route params projected as a JSON object for schema validation.
    pub fn params_value(&self) -> Value {
        pairs_to_value(&self.params)
    }

    /// Decoded query pairs in order of appearance.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First query value for a key.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Query string projected as a JSON object; repeated keys become arrays.
    pub fn query_value(&self) -> Value {
        pairs_to_value(&self.query)
    }

    /// All headers, case-insensitive by construction.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All parsed request cookies.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// A plain cookie value.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// A signed cookie, verified on access.
    ///
    /// Returns `None` when no secret is configured, the cookie is missing,
    /// or the signature does not verify.
    pub fn signed_cookie(&self, name: &str) -> Option<String> {
        let secret = self.cookie_secret.as_deref()?;
        let raw = self.cookies.get(name)?;
        cookies::verify_signed(secret, name, raw)
    }

    /// The raw body bytes.
    pub fn raw_body(&self) -> &Bytes {
        &self.body_bytes
    }

    /// Cancellation signal wired to client disconnect and the action timeout.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// The `Content-Type` without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type")
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// The parsed body as JSON.
    ///
    /// Parsed once on first access per `Content-Type`; later calls return
    /// the cached value. Unrecognized content types yield `Null` here (the
    /// bytes stay available via [`raw_body`](Self::raw_body)). Bodies over
    /// the configured limit are rejected.
    pub async fn body(&self) -> Result<Value> {
        let parsed = self.parse_body().await?;
        Ok(match parsed {
            ParsedBody::Empty | ParsedBody::Raw => Value::Null,
            ParsedBody::Json(v) | ParsedBody::Form(v) => v.clone(),
            ParsedBody::Multipart { fields, .. } => fields.clone(),
        })
    }

    /// A named multipart file part, when the body was `multipart/form-data`.
    pub async fn upload(&self, name: &str) -> Result<Option<Upload>> {
        let parsed = self.parse_body().await?;
        Ok(match parsed {
            ParsedBody::Multipart { uploads, .. } => uploads.get(name).cloned(),
            _ => None,
        })
    }

    async fn parse_body(&self) -> Result<&ParsedBody> {
        self.parsed
            .get_or_try_init(|| async {
                if self.body_bytes.len() > self.body_limit_bytes {
                    return Err(Error::PayloadTooLarge {
                        limit_bytes: self.body_limit_bytes,
                    });
                }
                if self.body_bytes.is_empty() {
                    return Ok(ParsedBody::Empty);
                }
                match self.content_type().as_deref() {
                    Some("application/json") => {
                        let value: Value =
                            serde_json::from_slice(&self.body_bytes).map_err(|e| {
                                Error::validation(
                                    "body is not valid JSON",
                                    serde_json::json!({ "body": [e.to_string()] }),
                                )
                            })?;
                        Ok(ParsedBody::Json(value))
                    }
                    Some("application/x-www-form-urlencoded") => {
                        let pairs: Vec<(String, String)> =
                            form_urlencoded::parse(&self.body_bytes)
                                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                                .collect();
                        Ok(ParsedBody::Form(pairs_to_value(&pairs)))
                    }
                    Some("multipart/form-data") => self.parse_multipart().await,
                    _ => Ok(ParsedBody::Raw),
                }
            })
            .await
    }

    async fn parse_multipart(&self) -> Result<ParsedBody> {
        let content_type = self.header("content-type").unwrap_or_default();
        let boundary = multer::parse_boundary(content_type).map_err(|e| {
            Error::validation(
                "multipart body missing boundary",
                serde_json::json!({ "body": [e.to_string()] }),
            )
        })?;
        let bytes = self.body_bytes.clone();
        let stream =
            futures::stream::once(async move { Ok::<Bytes, std::io::Error>(bytes) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let mut fields = Map::new();
        let mut uploads = HashMap::new();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            Error::validation(
                "malformed multipart body",
                serde_json::json!({ "body": [e.to_string()] }),
            )
        })? {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(|m| m.to_string());
            let data = field.bytes().await.map_err(|e| {
                Error::validation(
                    "malformed multipart body",
                    serde_json::json!({ "body": [e.to_string()] }),
                )
            })?;
            // Field and total caps share the body limit
            if data.len() > self.body_limit_bytes {
                return Err(Error::PayloadTooLarge {
                    limit_bytes: self.body_limit_bytes,
                });
            }
            if filename.is_some() {
                fields.insert(
                    name.clone(),
                    serde_json::json!({
                        "filename": filename,
                        "content_type": content_type,
                        "size": data.len(),
                    }),
                );
                uploads.insert(
                    name,
                    Upload {
                        filename,
                        content_type,
                        data,
                    },
                );
            } else {
                let text = String::from_utf8_lossy(&data).into_owned();
                fields.insert(name, Value::String(text));
            }
        }
        Ok(ParsedBody::Multipart {
            fields: Value::Object(fields),
            uploads,
        })
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Project pairs into a JSON object: repeated keys become arrays, single
/// values stay strings (schemas coerce types).
fn pairs_to_value(pairs: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(key) {
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
            Some(Value::Array(items)) => items.push(Value::String(value.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.clone())]);
            }
        }
    }
    Value::Object(map)
}
