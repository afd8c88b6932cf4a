//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: IGNITER_)
//! 2. Current working directory: ./igniter.toml
//! 3. Default values
//!
//! The builder's `.config(..)` stage takes a fully-formed [`IgniterConfig`],
//! so programmatic configuration always wins over file/env loading.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Runtime configuration for an Igniter application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgniterConfig {
    /// Absolute origin prepended by the URL builder (e.g. `https://api.example.com`)
    #[serde(default)]
    pub base_url: String,

    /// Path prefix every route is mounted under
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Per-action timeout for non-stream actions, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum accepted request body size, in bytes
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,

    /// Realtime (SSE) tuning
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Key for signed cookies; signing is disabled when absent
    #[serde(default)]
    pub cookie_secret: Option<String>,
}

/// Realtime bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Heartbeat comment interval in milliseconds (default: 15000)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Bounded outbound queue size per connection (default: 1024)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// What to do when a connection's queue overflows
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Default `retry:` hint sent to clients, in milliseconds (default: 3000)
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

/// Queue overflow policy for slow SSE consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame (default)
    #[default]
    DropOldest,
    /// Discard the incoming frame
    DropNewest,
    /// Close the connection
    Close,
}

impl IgniterConfig {
    /// Load configuration from defaults, `./igniter.toml`, and `IGNITER_` env vars.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("igniter.toml"))
            .merge(Env::prefixed("IGNITER_").split("__"))
            .extract()
            .map_err(|e| Error::config_invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the builder relies on.
    ///
    /// Called by `IgniterBuilder::create()`; a violation is `CONFIG_INVALID`.
    pub fn validate(&self) -> Result<()> {
        if !self.base_path.starts_with('/') {
            return Err(Error::config_invalid(format!(
                "base_path must start with '/', got {:?}",
                self.base_path
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::config_invalid("timeout_ms must be non-zero"));
        }
        if self.realtime.queue_size == 0 {
            return Err(Error::config_invalid("realtime.queue_size must be non-zero"));
        }
        Ok(())
    }

    /// The action timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for IgniterConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            base_path: default_base_path(),
            timeout_ms: default_timeout_ms(),
            body_limit_bytes: default_body_limit_bytes(),
            realtime: RealtimeConfig::default(),
            cookie_secret: None,
        }
    }
}

impl RealtimeConfig {
    /// Heartbeat interval as a Duration.
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// Client retry hint as a Duration.
    #[must_use]
    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            queue_size: default_queue_size(),
            overflow_policy: OverflowPolicy::default(),
            retry_ms: default_retry_ms(),
        }
    }
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_body_limit_bytes() -> usize {
    1_048_576
}

fn default_heartbeat_ms() -> u64 {
    15_000
}

fn default_queue_size() -> usize {
    1024
}

fn default_retry_ms() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IgniterConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.base_path, "/");
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.body_limit_bytes, 1_048_576);
        assert_eq!(config.realtime.heartbeat_ms, 15_000);
        assert_eq!(config.realtime.queue_size, 1024);
        assert_eq!(config.realtime.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_validate_rejects_relative_base_path() {
        let config = IgniterConfig {
            base_path: "api".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = IgniterConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overflow_policy_wire_names() {
        let policy: OverflowPolicy = serde_json::from_str("\"drop-newest\"").unwrap();
        assert_eq!(policy, OverflowPolicy::DropNewest);
        let policy: OverflowPolicy = serde_json::from_str("\"close\"").unwrap();
        assert_eq!(policy, OverflowPolicy::Close);
    }
}
