//! Input validation contract
//!
//! The core treats any validator implementing the `parse(input) → output |
//! issues` contract interchangeably. [`Schema`] is that contract, object-safe
//! over JSON values so actions can carry heterogeneous schema sets. Built-ins
//! cover the common cases: plain serde deserialization, query-string-friendly
//! coercion, and garde-backed field validation.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// A single validation problem, addressed by dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Dotted path into the input, e.g. `page` or `profile.email`
    pub path: String,
    /// Human-readable message
    pub message: String,
}

impl SchemaIssue {
    /// Create an issue.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validation outcome: the (possibly transformed) value, or the issue list.
pub type SchemaResult = std::result::Result<Value, Vec<SchemaIssue>>;

/// The validation contract consumed by the action executor.
///
/// `parse` receives the raw input and returns the validated (and possibly
/// coerced) output, or a non-empty list of issues. Implementations must not
/// panic on malformed input.
pub trait Schema: Send + Sync {
    /// Validate and transform the input.
    fn parse(&self, input: Value) -> SchemaResult;
}

/// A shared, type-erased schema handle as stored on actions and procedures.
pub type SchemaRef = Arc<dyn Schema>;

impl<F> Schema for F
where
    F: Fn(Value) -> SchemaResult + Send + Sync,
{
    fn parse(&self, input: Value) -> SchemaResult {
        self(input)
    }
}

/// Schema that deserializes into `T` and re-serializes the result.
///
/// The round-trip drops unknown fields when `T` uses
/// `#[serde(deny_unknown_fields)]` semantics and normalizes defaults, so the
/// handler sees exactly what the type describes.
struct TypedSchema<T> {
    coerce: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + serde::Serialize + Send + Sync,
{
    fn parse(&self, input: Value) -> SchemaResult {
        let input = if self.coerce { coerce_scalars(input) } else { input };
        let parsed: T = serde_json::from_value(input)
            .map_err(|e| vec![issue_from_serde(&e)])?;
        serde_json::to_value(parsed)
            .map_err(|e| vec![SchemaIssue::new("", e.to_string())])
    }
}

/// Schema that additionally runs garde field validation after deserializing.
struct ValidatedSchema<T> {
    coerce: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Schema for ValidatedSchema<T>
where
    T: DeserializeOwned + serde::Serialize + garde::Validate + Send + Sync,
    T::Context: Default,
{
    fn parse(&self, input: Value) -> SchemaResult {
        let input = if self.coerce { coerce_scalars(input) } else { input };
        let parsed: T = serde_json::from_value(input)
            .map_err(|e| vec![issue_from_serde(&e)])?;
        parsed
            .validate()
            .map_err(|report| issues_from_garde(&report))?;
        serde_json::to_value(parsed)
            .map_err(|e| vec![SchemaIssue::new("", e.to_string())])
    }
}

/// Strict serde-backed schema for JSON bodies.
pub fn typed<T>() -> SchemaRef
where
    T: DeserializeOwned + serde::Serialize + Send + Sync + 'static,
{
    Arc::new(TypedSchema::<T> {
        coerce: false,
        _marker: std::marker::PhantomData,
    })
}

/// Serde-backed schema that first coerces numeric- and boolean-looking
/// strings, for query strings and form bodies where everything arrives as
/// text.
pub fn typed_coercing<T>() -> SchemaRef
where
    T: DeserializeOwned + serde::Serialize + Send + Sync + 'static,
{
    Arc::new(TypedSchema::<T> {
        coerce: true,
        _marker: std::marker::PhantomData,
    })
}

/// Serde + garde schema for JSON bodies.
pub fn validated<T>() -> SchemaRef
where
    T: DeserializeOwned + serde::Serialize + garde::Validate + Send + Sync + 'static,
    T::Context: Default,
{
    Arc::new(ValidatedSchema::<T> {
        coerce: false,
        _marker: std::marker::PhantomData,
    })
}

/// Serde + garde schema with scalar coercion, for query strings.
pub fn validated_coercing<T>() -> SchemaRef
where
    T: DeserializeOwned + serde::Serialize + garde::Validate + Send + Sync + 'static,
    T::Context: Default,
{
    Arc::new(ValidatedSchema::<T> {
        coerce: true,
        _marker: std::marker::PhantomData,
    })
}

/// Wrap a closure as a schema.
pub fn schema_fn<F>(f: F) -> SchemaRef
where
    F: Fn(Value) -> SchemaResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Convert issues into the framework validation error.
///
/// `prefix` names the input section (`params`, `query`, `body`, or a
/// procedure name) so details pin the offending location, e.g. `query.page`.
pub fn issues_to_error(prefix: &str, issues: Vec<SchemaIssue>) -> Error {
    let mut details = Map::new();
    for issue in &issues {
        let key = if issue.path.is_empty() {
            prefix.to_string()
        } else {
            format!("{}.{}", prefix, issue.path)
        };
        details
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .expect("details entries are arrays")
            .push(Value::String(issue.message.clone()));
    }
    Error::validation(
        format!("{} failed validation", prefix),
        Value::Object(details),
    )
}

/// Recursively turn `"42"` / `"4.5"` / `"true"` / `"false"` scalars into
/// their typed forms. Strings that do not parse cleanly stay strings.
fn coerce_scalars(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if s == "true" {
                Value::Bool(true)
            } else if s == "false" {
                Value::Bool(false)
            } else if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::String(s))
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_scalars).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, coerce_scalars(v)))
                .collect(),
        ),
        other => other,
    }
}

fn issue_from_serde(err: &serde_json::Error) -> SchemaIssue {
    // serde_json reports the JSON pointer inside its message; keep the path
    // empty and let the prefix identify the section.
    SchemaIssue::new("", err.to_string())
}

fn issues_from_garde(report: &garde::Report) -> Vec<SchemaIssue> {
    report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            let path = if path.is_empty() { "value".to_string() } else { path };
            SchemaIssue::new(path, error.message().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, garde::Validate)]
    struct Pagination {
        #[garde(range(min = 1))]
        page: u32,
        #[garde(range(min = 1, max = 100))]
        limit: u32,
    }

    #[test]
    fn test_typed_schema_accepts_valid_input() {
        let schema = typed::<Pagination>();
        let out = schema.parse(json!({"page": 2, "limit": 10})).unwrap();
        assert_eq!(out, json!({"page": 2, "limit": 10}));
    }

    #[test]
    fn test_typed_schema_rejects_wrong_types() {
        let schema = typed::<Pagination>();
        assert!(schema.parse(json!({"page": "two", "limit": 10})).is_err());
    }

    #[test]
    fn test_coercion_turns_query_strings_into_numbers() {
        let schema = typed_coercing::<Pagination>();
        let out = schema.parse(json!({"page": "2", "limit": "10"})).unwrap();
        assert_eq!(out, json!({"page": 2, "limit": 10}));
    }

    #[test]
    fn test_validated_schema_reports_garde_paths() {
        let schema = validated_coercing::<Pagination>();
        let issues = schema
            .parse(json!({"page": "0", "limit": "10"}))
            .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "page");
    }

    #[test]
    fn test_issues_to_error_prefixes_paths() {
        let err = issues_to_error(
            "query",
            vec![SchemaIssue::new("page", "must be >= 1")],
        );
        let body = err.to_body();
        assert_eq!(body.error.code, "VALIDATION_FAILED");
        let details = body.error.details.unwrap();
        assert_eq!(details["query.page"], json!(["must be >= 1"]));
    }

    #[test]
    fn test_closure_schema() {
        let schema = schema_fn(|v| {
            if v.get("ok").is_some() {
                Ok(v)
            } else {
                Err(vec![SchemaIssue::new("ok", "required")])
            }
        });
        assert!(schema.parse(json!({"ok": 1})).is_ok());
        assert!(schema.parse(json!({})).is_err());
    }

    #[test]
    fn test_coercion_leaves_plain_strings_alone() {
        let v = coerce_scalars(json!({"name": "alice", "age": "31"}));
        assert_eq!(v, json!({"name": "alice", "age": 31}));
    }
}
