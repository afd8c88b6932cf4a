//! Router: controller mounting, trie lookup, dispatch, URL construction
//!
//! Routes index into a per-method trie keyed on path segments. Static
//! segments shadow parameter segments at the same depth; a terminal `*rest`
//! captures one or more segments. The router owns the HTTP entry point that
//! host adapters wrap: `handle(request) → response`.

use bytes::Bytes;
use futures::stream::BoxStream;
use http::Method;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::builder::AppCore;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::executor;
use crate::procedure::ProcedureRef;
use crate::realtime::handle_realtime;
use crate::reply::{Reply, Sealed};
use crate::request::Request;

/// Response body handed back to host adapters: a full buffer or a byte
/// stream (SSE).
pub enum HttpBody {
    /// Complete body
    Full(Bytes),
    /// Streaming body; the connection stays open while it yields
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl HttpBody {
    /// An empty full body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }
}

impl std::fmt::Debug for HttpBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Normalize a request path: collapse adjacent slashes, strip the trailing
/// slash except at root, and URL-decode each segment.
pub(crate) fn normalize_path(raw: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    for segment in raw.split('/') {
        if segment.is_empty() {
            continue;
        }
        segments.push(percent_decode_str(segment).decode_utf8_lossy().into_owned());
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Join pattern fragments (base path, controller path, action path) without
/// decoding, collapsing slashes.
fn join_pattern(parts: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for part in parts {
        for segment in part.split('/') {
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSeg {
    Static(String),
    Param(String),
    Wildcard(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<PatternSeg>> {
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(Error::config_invalid(format!(
                    "empty param name in route {pattern:?}"
                )));
            }
            out.push(PatternSeg::Param(name.to_string()));
        } else if let Some(name) = segment.strip_prefix('*') {
            if name.is_empty() {
                return Err(Error::config_invalid(format!(
                    "empty wildcard name in route {pattern:?}"
                )));
            }
            if index != segments.len() - 1 {
                return Err(Error::config_invalid(format!(
                    "wildcard must be the last segment in route {pattern:?}"
                )));
            }
            out.push(PatternSeg::Wildcard(name.to_string()));
        } else {
            out.push(PatternSeg::Static((*segment).to_string()));
        }
    }
    Ok(out)
}

#[derive(Default)]
struct TrieNode {
    static_children: BTreeMap<String, TrieNode>,
    param_child: Option<(String, Box<TrieNode>)>,
    wildcard: Option<(String, usize)>,
    leaf: Option<usize>,
}

impl TrieNode {
    fn insert(&mut self, segments: &[PatternSeg], route: usize, pattern: &str) -> Result<()> {
        let Some((head, rest)) = segments.split_first() else {
            if self.leaf.is_some() {
                return Err(Error::config_invalid(format!(
                    "duplicate route {pattern:?}"
                )));
            }
            self.leaf = Some(route);
            return Ok(());
        };
        match head {
            PatternSeg::Static(name) => self
                .static_children
                .entry(name.clone())
                .or_default()
                .insert(rest, route, pattern),
            PatternSeg::Param(name) => {
                let (existing, node) = self
                    .param_child
                    .get_or_insert_with(|| (name.clone(), Box::default()));
                if existing.as_str() != name.as_str() {
                    return Err(Error::config_invalid(format!(
                        "conflicting param names {existing:?} and {name:?} in route {pattern:?}"
                    )));
                }
                node.insert(rest, route, pattern)
            }
            PatternSeg::Wildcard(name) => {
                if self.wildcard.is_some() {
                    return Err(Error::config_invalid(format!(
                        "duplicate route {pattern:?}"
                    )));
                }
                self.wildcard = Some((name.clone(), route));
                Ok(())
            }
        }
    }

    /// Depth-first match; static children win over the param child, and the
    /// wildcard is the last resort.
    fn find(&self, segments: &[&str], params: &mut Vec<(String, String)>) -> Option<usize> {
        let Some((head, rest)) = segments.split_first() else {
            return self.leaf;
        };
        if let Some(child) = self.static_children.get(*head) {
            if let Some(route) = child.find(rest, params) {
                return Some(route);
            }
        }
        if let Some((name, child)) = &self.param_child {
            params.push((name.clone(), (*head).to_string()));
            if let Some(route) = child.find(rest, params) {
                return Some(route);
            }
            params.pop();
        }
        if let Some((name, route)) = &self.wildcard {
            params.push((name.clone(), segments.join("/")));
            return Some(*route);
        }
        None
    }
}

/// One mounted route.
pub(crate) struct RouteEntry {
    pub(crate) route_key: String,
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) action: Action,
    /// Effective chain: global, then controller, then action procedures.
    pub(crate) procedures: Vec<ProcedureRef>,
    /// Pub/sub channel, resolved for stream actions.
    pub(crate) channel: Option<String>,
}

/// Registers controllers and mounts them into a [`Router`].
pub struct RouterBuilder {
    core: Arc<AppCore>,
    controllers: Vec<(String, Controller)>,
}

impl RouterBuilder {
    pub(crate) fn new(core: Arc<AppCore>) -> Self {
        Self {
            core,
            controllers: Vec::new(),
        }
    }

    /// Register a controller under its client-visible key.
    #[must_use]
    pub fn register(mut self, key: impl Into<String>, controller: Controller) -> Self {
        self.controllers.push((key.into(), controller));
        self
    }

    /// Index every action and freeze the router.
    ///
    /// Fails with `CONFIG_INVALID` on duplicate routes, malformed patterns,
    /// or actions without handlers.
    pub fn mount(self) -> Result<Router> {
        let base_path = self.core.config.base_path.clone();
        let mut routes: Vec<Arc<RouteEntry>> = Vec::new();
        let mut trees: HashMap<Method, TrieNode> = HashMap::new();
        let mut by_key: HashMap<(String, String), usize> = HashMap::new();

        for (controller_key, controller) in self.controllers {
            let controller_procedures = controller.procedures;
            let controller_path = controller.path;
            for (action_key, builder) in controller.actions {
                let action = builder.build()?;
                let pattern = join_pattern(&[&base_path, &controller_path, &action.path]);
                let method = action.kind().method();
                let route_key = format!("{controller_key}.{action_key}");
                let channel = match action.kind() {
                    crate::action::ActionKind::Stream => Some(
                        action.channel.clone().unwrap_or_else(|| route_key.clone()),
                    ),
                    _ => None,
                };
                let mut procedures = self.core.global_procedures.clone();
                procedures.extend(controller_procedures.iter().cloned());
                procedures.extend(action.procedures.iter().cloned());

                let index = routes.len();
                let segments = parse_pattern(&pattern)?;
                trees
                    .entry(method.clone())
                    .or_default()
                    .insert(&segments, index, &pattern)?;
                if by_key
                    .insert((controller_key.clone(), action_key.clone()), index)
                    .is_some()
                {
                    return Err(Error::config_invalid(format!(
                        "duplicate action key {controller_key}.{action_key}"
                    )));
                }
                routes.push(Arc::new(RouteEntry {
                    route_key,
                    method,
                    pattern,
                    action,
                    procedures,
                    channel,
                }));
            }
        }

        let realtime_path = join_pattern(&[&base_path, "__realtime__"]);
        Ok(Router {
            core: self.core,
            routes,
            trees,
            by_key,
            realtime_path,
        })
    }
}

/// The frozen route table plus the dispatch entry point.
pub struct Router {
    core: Arc<AppCore>,
    routes: Vec<Arc<RouteEntry>>,
    trees: HashMap<Method, TrieNode>,
    by_key: HashMap<(String, String), usize>,
    realtime_path: String,
}

impl Router {
    /// Dispatch one request. This is the surface host adapters wrap.
    pub async fn handle(&self, req: http::Request<Bytes>) -> http::Response<HttpBody> {
        let signal = CancellationToken::new();
        let mut request = Request::from_http(
            req,
            self.core.config.body_limit_bytes,
            self.core.config.cookie_secret.clone(),
            signal,
        );

        if request.path() == self.realtime_path && request.method() == Method::GET {
            return handle_realtime(&self.core.bus, &request).await;
        }

        let is_head = request.method() == Method::HEAD;
        let lookup_method = if is_head {
            Method::GET
        } else {
            request.method().clone()
        };

        let segments = path_segments(request.path());
        let matched = self.trees.get(&lookup_method).and_then(|tree| {
            let mut params = Vec::new();
            tree.find(&segments, &mut params).map(|route| (route, params))
        });

        let Some((route_index, params)) = matched else {
            let allowed = self.allowed_methods(&segments);
            let err = if allowed.is_empty() {
                Error::NotFound(format!("no route for {}", request.path()))
            } else {
                Error::MethodNotAllowed { allowed }
            };
            return error_response(&err);
        };

        request.set_params(params);
        let route = Arc::clone(&self.routes[route_index]);
        let mut response = executor::execute(&self.core, &route, request).await;
        if is_head {
            *response.body_mut() = HttpBody::empty();
        }
        response
    }

    /// Methods registered for a path, for the `Allow` header.
    fn allowed_methods(&self, segments: &[&str]) -> Vec<Method> {
        let mut allowed: Vec<Method> = self
            .trees
            .iter()
            .filter(|(_, tree)| {
                let mut params = Vec::new();
                tree.find(segments, &mut params).is_some()
            })
            .map(|(method, _)| method.clone())
            .collect();
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }

    /// Build the canonical URL for an action.
    ///
    /// Arrays serialize as repeated query keys, so passing `("tag", "a")`
    /// and `("tag", "b")` yields `?tag=a&tag=b`.
    pub fn url_for(
        &self,
        controller: &str,
        action: &str,
        params: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<String> {
        let index = self
            .by_key
            .get(&(controller.to_string(), action.to_string()))
            .ok_or_else(|| {
                Error::config_invalid(format!("unknown action {controller}.{action}"))
            })?;
        let route = &self.routes[*index];
        let mut path = String::new();
        for segment in parse_pattern(&route.pattern)? {
            path.push('/');
            match segment {
                PatternSeg::Static(name) => path.push_str(&name),
                PatternSeg::Param(name) => {
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            Error::config_invalid(format!(
                                "missing param {name:?} for {controller}.{action}"
                            ))
                        })?;
                    path.push_str(&utf8_percent_encode(value, PATH_SEGMENT).to_string());
                }
                PatternSeg::Wildcard(name) => {
                    let value = params
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            Error::config_invalid(format!(
                                "missing param {name:?} for {controller}.{action}"
                            ))
                        })?;
                    let encoded: Vec<String> = value
                        .split('/')
                        .map(|part| utf8_percent_encode(part, PATH_SEGMENT).to_string())
                        .collect();
                    path.push_str(&encoded.join("/"));
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        let mut url = format!("{}{}", self.core.config.base_url, path);
        if !query.is_empty() {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, value) in query {
                serializer.append_pair(key, value);
            }
            url.push('?');
            url.push_str(&serializer.finish());
        }
        Ok(url)
    }

    /// Route keys in registration order (`users.list`, ...).
    pub fn route_keys(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.route_key.as_str()).collect()
    }

    /// The application configuration this router was mounted with.
    pub fn config(&self) -> &crate::config::IgniterConfig {
        &self.core.config
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.route_keys())
            .finish_non_exhaustive()
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Everything except unreserved characters gets percent-encoded in built
/// path segments.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'<')
    .add(b'>')
    .add(b'`');

/// Convert a sealed reply into the host-facing response.
pub(crate) fn sealed_to_http(sealed: Sealed) -> http::Response<HttpBody> {
    let mut response = http::Response::new(HttpBody::Full(sealed.body));
    *response.status_mut() = sealed.status;
    *response.headers_mut() = sealed.headers;
    response
}

/// Convert a framework error into the host-facing response.
pub(crate) fn error_response(err: &Error) -> http::Response<HttpBody> {
    match Reply::from_error(err).finalize(None) {
        Ok(sealed) => sealed_to_http(sealed),
        Err(inner) => {
            tracing::error!("failed to finalize error response: {inner}");
            let mut response = http::Response::new(HttpBody::empty());
            *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
