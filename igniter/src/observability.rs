//! Tracing initialization

use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Initialize JSON-formatted tracing with an env-filter.
///
/// `default_level` applies when `RUST_LOG` is unset. Call once at startup;
/// calling twice returns an error from the subscriber registry.
pub fn init_tracing(default_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
        )
        .try_init()
        .map_err(|e| crate::error::Error::internal(format!("tracing init failed: {e}")))?;

    tracing::info!("tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_not_reentrant() {
        // First call may or may not win depending on test order; the second
        // definitely fails, and neither panics.
        let _ = init_tracing("info");
        assert!(init_tracing("info").is_err());
    }
}
