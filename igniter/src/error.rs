//! Error taxonomy and client-safe wire serialization
//!
//! Every failure the runtime can surface maps to a machine code from a fixed
//! taxonomy. The code strings are part of the public contract: generated
//! clients switch on them, so they must never change spelling.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type alias using the framework error
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error codes forming the public contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Input failed schema validation (400)
    ValidationFailed,
    /// Missing or invalid credentials (401)
    Unauthorized,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// No route or resource (404)
    NotFound,
    /// Known path, unknown method (405)
    MethodNotAllowed,
    /// State conflict (409)
    Conflict,
    /// Semantically invalid input (422)
    Unprocessable,
    /// Rate limited (429)
    TooManyRequests,
    /// Body exceeded the configured limit (413)
    PayloadTooLarge,
    /// Handler exceeded the action timeout (504)
    RequestTimeout,
    /// Unclassified server failure (500)
    InternalError,
    /// `enqueue` called without a Jobs adapter (500, developer error)
    JobsNotConfigured,
    /// Store-dependent feature used without a Store adapter (500, developer error)
    StoreNotConfigured,
    /// Invalid builder or cookie configuration (500, developer error)
    ConfigInvalid,
    /// Response mutated after the executor sealed it (500, programmer error)
    ResponseSealed,
}

impl ErrorCode {
    /// The wire spelling of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Conflict => "CONFLICT",
            Self::Unprocessable => "UNPROCESSABLE",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
            Self::JobsNotConfigured => "JOBS_NOT_CONFIGURED",
            Self::StoreNotConfigured => "STORE_NOT_CONFIGURED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ResponseSealed => "RESPONSE_SEALED",
        }
    }

    /// The HTTP status this code maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InternalError
            | Self::JobsNotConfigured
            | Self::StoreNotConfigured
            | Self::ConfigInvalid
            | Self::ResponseSealed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether `details` may be emitted on the wire for this code.
    ///
    /// Everything else serializes code + message only; internals never leak.
    pub fn exposes_details(&self) -> bool {
        matches!(self, Self::ValidationFailed | Self::Unprocessable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the framework
#[derive(Debug, Error)]
pub enum Error {
    /// Input failed schema validation
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Human-readable summary
        message: String,
        /// Offending paths and messages, keyed by dotted path
        details: Value,
    },

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No route or resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Known path, unknown method
    #[error("Method not allowed")]
    MethodNotAllowed {
        /// Methods registered for the path, for the `Allow` header
        allowed: Vec<http::Method>,
    },

    /// Resource conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Semantically invalid input
    #[error("Unprocessable: {message}")]
    Unprocessable {
        /// Human-readable summary
        message: String,
        /// Field-level details
        details: Value,
    },

    /// Rate limit exceeded
    #[error("Too many requests")]
    TooManyRequests,

    /// Request body exceeded the configured limit
    #[error("Payload too large: limit is {limit_bytes} bytes")]
    PayloadTooLarge {
        /// The configured limit
        limit_bytes: usize,
    },

    /// Handler exceeded the action timeout
    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The configured timeout
        timeout_ms: u64,
    },

    /// Unclassified server failure
    #[error("Internal server error: {0}")]
    Internal(String),

    /// `enqueue` called without a Jobs adapter
    #[error("Jobs adapter is not configured")]
    JobsNotConfigured,

    /// Store-dependent feature used without a Store adapter
    #[error("Store adapter is not configured")]
    StoreNotConfigured,

    /// Invalid builder or cookie configuration
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Response mutated after the executor sealed it
    #[error("Response already sealed")]
    ResponseSealed,

    /// I/O error from the host adapter
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a validation error from schema issue pairs.
    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::ValidationFailed {
            message: message.into(),
            details,
        }
    }

    /// Build an unprocessable error with field-level details.
    pub fn unprocessable(message: impl Into<String>, details: Value) -> Self {
        Self::Unprocessable {
            message: message.into(),
            details,
        }
    }

    /// Build a config error.
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    /// Build an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The taxonomy code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::MethodNotAllowed { .. } => ErrorCode::MethodNotAllowed,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unprocessable { .. } => ErrorCode::Unprocessable,
            Self::TooManyRequests => ErrorCode::TooManyRequests,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            Self::Internal(_) | Self::Io(_) => ErrorCode::InternalError,
            Self::JobsNotConfigured => ErrorCode::JobsNotConfigured,
            Self::StoreNotConfigured => ErrorCode::StoreNotConfigured,
            Self::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            Self::ResponseSealed => ErrorCode::ResponseSealed,
        }
    }

    /// The HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// The client-safe wire body.
    ///
    /// Stack traces and internal messages never reach the wire: internal
    /// errors serialize a generic message, and `details` is emitted only for
    /// codes that expose them.
    pub fn to_body(&self) -> ErrorBody {
        let code = self.code();
        let message = match self {
            Self::Internal(_) | Self::Io(_) => "An unexpected error occurred".to_string(),
            Self::ValidationFailed { message, .. } | Self::Unprocessable { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };
        let details = if code.exposes_details() {
            match self {
                Self::ValidationFailed { details, .. } | Self::Unprocessable { details, .. } => {
                    Some(details.clone())
                }
                _ => None,
            }
        } else {
            None
        };
        ErrorBody {
            error: ErrorBodyInner {
                code: code.as_str().to_string(),
                message,
                details,
            },
        }
    }
}

/// Error response body, `{"error":{"code","message","details"}}` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error envelope
    pub error: ErrorBodyInner,
}

/// Inner error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBodyInner {
    /// Machine code, e.g. `VALIDATION_FAILED`
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Offending paths and messages; present only for validation codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_strings_are_stable() {
        assert_eq!(ErrorCode::ValidationFailed.as_str(), "VALIDATION_FAILED");
        assert_eq!(ErrorCode::MethodNotAllowed.as_str(), "METHOD_NOT_ALLOWED");
        assert_eq!(ErrorCode::PayloadTooLarge.as_str(), "PAYLOAD_TOO_LARGE");
        assert_eq!(ErrorCode::JobsNotConfigured.as_str(), "JOBS_NOT_CONFIGURED");
        assert_eq!(ErrorCode::ResponseSealed.as_str(), "RESPONSE_SEALED");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ErrorCode::PayloadTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        // Timeouts surface as 504, not 408: the deadline is enforced server-side.
        assert_eq!(ErrorCode::RequestTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::ConfigInvalid.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_details_reach_the_wire() {
        let err = Error::validation(
            "query failed validation",
            json!({"query.page": ["must be >= 1"]}),
        );
        let body = err.to_body();
        assert_eq!(body.error.code, "VALIDATION_FAILED");
        assert_eq!(
            body.error.details,
            Some(json!({"query.page": ["must be >= 1"]}))
        );
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = Error::internal("connection to 10.0.0.3:5432 refused");
        let body = err.to_body();
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert_eq!(body.error.message, "An unexpected error occurred");
        assert!(body.error.details.is_none());
    }

    #[test]
    fn test_details_suppressed_for_non_validation_codes() {
        let err = Error::Unauthorized("token expired".into());
        let body = err.to_body();
        assert_eq!(body.error.code, "UNAUTHORIZED");
        assert!(body.error.details.is_none());
    }

    #[test]
    fn test_wire_shape() {
        let err = Error::NotFound("no such user".into());
        let wire = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(
            wire,
            json!({"error": {"code": "NOT_FOUND", "message": "Not found: no such user"}})
        );
    }
}
