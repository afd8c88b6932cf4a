//! Logger adapter contract

use serde_json::{Map, Value};

/// Flat structured fields attached to a log line.
pub type LogFields = Map<String, Value>;

/// Severity levels in the adapter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    Info,
    /// Something surprising but recoverable
    Warn,
    /// A failure
    Error,
}

/// Logging contract exposed to handlers as `ctx.logger()`.
pub trait Logger: Send + Sync {
    /// Emit a log line.
    fn log(&self, level: LogLevel, message: &str, fields: Option<&LogFields>);

    /// Emit at debug level.
    fn debug(&self, message: &str, fields: Option<&LogFields>) {
        self.log(LogLevel::Debug, message, fields);
    }

    /// Emit at info level.
    fn info(&self, message: &str, fields: Option<&LogFields>) {
        self.log(LogLevel::Info, message, fields);
    }

    /// Emit at warn level.
    fn warn(&self, message: &str, fields: Option<&LogFields>) {
        self.log(LogLevel::Warn, message, fields);
    }

    /// Emit at error level.
    fn error(&self, message: &str, fields: Option<&LogFields>) {
        self.log(LogLevel::Error, message, fields);
    }
}

/// Default logger: forwards to the `tracing` subscriber the host installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: Option<&LogFields>) {
        let fields = fields
            .map(|f| serde_json::to_string(f).unwrap_or_default())
            .unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(target: "igniter::app", %fields, "{message}"),
            LogLevel::Info => tracing::info!(target: "igniter::app", %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "igniter::app", %fields, "{message}"),
            LogLevel::Error => tracing::error!(target: "igniter::app", %fields, "{message}"),
        }
    }
}

/// Logger that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: Option<&LogFields>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_tracing_logger_does_not_panic() {
        let logger = TracingLogger;
        let mut fields = LogFields::new();
        fields.insert("user_id".into(), serde_json::json!(42));
        logger.info("hello", Some(&fields));
        logger.error("boom", None);
    }
}
