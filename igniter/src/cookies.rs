//! Cookie parsing, serialization, prefixes, and signing
//!
//! Outbound cookies are accumulated as operations on the response and
//! serialized to `Set-Cookie` headers when the executor applies deferred
//! effects. Signing uses a blake3 keyed hash derived from the configured
//! secret; a signed value travels as `{value}.{hex}` and verification failure
//! on read treats the cookie as absent.

use chrono::{DateTime, Utc};
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use http::HeaderMap;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Name prefix per RFC 6265bis: `__Host-` or `__Secure-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookiePrefix {
    /// `__Host-`: requires `secure`, `path: "/"`, and no `domain`
    Host,
    /// `__Secure-`: requires `secure`
    Secure,
}

impl CookiePrefix {
    fn apply(&self, name: &str) -> String {
        match self {
            Self::Host => format!("__Host-{name}"),
            Self::Secure => format!("__Secure-{name}"),
        }
    }
}

/// Outbound cookie attributes.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    /// `Domain` attribute
    pub domain: Option<String>,
    /// `Path` attribute
    pub path: Option<String>,
    /// Absolute expiry
    pub expires: Option<DateTime<Utc>>,
    /// `Max-Age` in seconds
    pub max_age_secs: Option<i64>,
    /// `HttpOnly`
    pub http_only: bool,
    /// `Secure`
    pub secure: bool,
    /// `SameSite`; `None` here means the attribute is omitted
    pub same_site: Option<SameSite>,
    /// `Partitioned` (CHIPS)
    pub partitioned: bool,
    /// Name prefix
    pub prefix: Option<CookiePrefix>,
    /// Append an HMAC; requires a configured cookie secret
    pub signed: bool,
}

impl CookieOptions {
    /// Parse a `SameSite` value case-insensitively.
    pub fn parse_same_site(value: &str) -> Option<SameSite> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

/// A deferred cookie mutation recorded on the response.
#[derive(Debug, Clone)]
pub enum CookieOp {
    /// Emit a `Set-Cookie` for `name=value`
    Set {
        /// Cookie name (pre-prefix)
        name: String,
        /// Cookie value
        value: String,
        /// Attributes
        options: CookieOptions,
    },
    /// Emit an expired `Set-Cookie` removing `name`
    Clear {
        /// Cookie name (pre-prefix)
        name: String,
        /// Attributes; `domain`/`path` must match the original cookie
        options: CookieOptions,
    },
}

/// Parse the `Cookie` request header into a name → value mapping.
///
/// Later duplicates win, matching browser serialization order semantics.
pub fn parse_request_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for cookie in Cookie::split_parse(raw.to_string()).flatten() {
            out.insert(cookie.name().to_string(), cookie.value().to_string());
        }
    }
    out
}

/// Serialize one cookie op into a `Set-Cookie` header value.
///
/// Prefix constraint violations surface as `CONFIG_INVALID`: they are
/// programmer errors, caught where the cookie is set rather than emitted
/// broken onto the wire.
pub fn serialize_set_cookie(op: &CookieOp, secret: Option<&str>) -> Result<String> {
    match op {
        CookieOp::Set {
            name,
            value,
            options,
        } => {
            let options = enforce_same_site(name, options.clone());
            let name = validated_name(name, &options)?;
            let value = if options.signed {
                let secret = secret.ok_or_else(|| {
                    Error::config_invalid(format!(
                        "cookie {name:?} requested signing but no cookie_secret is configured"
                    ))
                })?;
                sign_value(secret, &name, value)
            } else {
                value.clone()
            };
            Ok(build_cookie(&name, &value, &options).to_string())
        }
        CookieOp::Clear { name, options } => {
            let options = enforce_same_site(name, options.clone());
            let name = validated_name(name, &options)?;
            let mut cookie = build_cookie(&name, "", &options);
            cookie.set_max_age(CookieDuration::ZERO);
            cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
            Ok(cookie.to_string())
        }
    }
}

/// `SameSite=None` without `Secure` is rejected by browsers; force it on and
/// warn instead of emitting a cookie that silently disappears.
fn enforce_same_site(name: &str, mut options: CookieOptions) -> CookieOptions {
    if options.same_site == Some(SameSite::None) && !options.secure {
        tracing::warn!(cookie = name, "SameSite=None requires Secure; forcing secure");
        options.secure = true;
    }
    options
}

fn validated_name(name: &str, options: &CookieOptions) -> Result<String> {
    match options.prefix {
        Some(CookiePrefix::Host) => {
            if !options.secure {
                return Err(Error::config_invalid(format!(
                    "__Host- cookie {name:?} requires secure"
                )));
            }
            if options.domain.is_some() {
                return Err(Error::config_invalid(format!(
                    "__Host- cookie {name:?} must not set a domain"
                )));
            }
            if options.path.as_deref().unwrap_or("/") != "/" {
                return Err(Error::config_invalid(format!(
                    "__Host- cookie {name:?} requires path \"/\""
                )));
            }
            Ok(CookiePrefix::Host.apply(name))
        }
        Some(CookiePrefix::Secure) => {
            if !options.secure {
                return Err(Error::config_invalid(format!(
                    "__Secure- cookie {name:?} requires secure"
                )));
            }
            Ok(CookiePrefix::Secure.apply(name))
        }
        None => Ok(name.to_string()),
    }
}

fn build_cookie(name: &str, value: &str, options: &CookieOptions) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value.to_string());
    if let Some(domain) = &options.domain {
        cookie.set_domain(domain.clone());
    }
    match (&options.path, options.prefix) {
        (Some(path), _) => cookie.set_path(path.clone()),
        // __Host- requires an explicit Path=/
        (None, Some(CookiePrefix::Host)) => cookie.set_path("/"),
        (None, _) => {}
    }
    if let Some(expires) = options.expires {
        if let Ok(at) = OffsetDateTime::from_unix_timestamp(expires.timestamp()) {
            cookie.set_expires(at);
        }
    }
    if let Some(secs) = options.max_age_secs {
        cookie.set_max_age(CookieDuration::seconds(secs));
    }
    if options.http_only {
        cookie.set_http_only(true);
    }
    if options.secure {
        cookie.set_secure(true);
    }
    if let Some(same_site) = options.same_site {
        cookie.set_same_site(same_site);
    }
    if options.partitioned {
        cookie.set_partitioned(true);
    }
    cookie
}

/// Append the signature: `{value}.{hex}`.
pub fn sign_value(secret: &str, name: &str, value: &str) -> String {
    let mac = compute_mac(secret, name, value);
    format!("{}.{}", value, mac.to_hex())
}

/// Verify a signed cookie value, returning the inner value on success.
///
/// A missing or mismatched signature yields `None`; the caller treats the
/// cookie as absent.
pub fn verify_signed(secret: &str, name: &str, raw: &str) -> Option<String> {
    let (value, hex) = raw.rsplit_once('.')?;
    let claimed = blake3::Hash::from_hex(hex).ok()?;
    let expected = compute_mac(secret, name, value);
    // blake3::Hash equality is constant-time
    if claimed == expected {
        Some(value.to_string())
    } else {
        None
    }
}

fn compute_mac(secret: &str, name: &str, value: &str) -> blake3::Hash {
    let key = blake3::derive_key("igniter cookie signing v1", secret.as_bytes());
    let mut hasher = blake3::Hasher::new_keyed(&key);
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update(value.as_bytes());
    hasher.finalize()
}
