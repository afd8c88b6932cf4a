//! Plugin registry
//!
//! Plugins are named values registered at build time and exposed on every
//! request context. The core gives them no lifecycle beyond storage; richer
//! integration (routes, jobs) belongs to the plugin's own crate.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A named extension registered on the application.
pub trait Plugin: Send + Sync + 'static {
    /// Stable name the registry is keyed by.
    fn name(&self) -> &str;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Immutable map of plugins, shared by every request.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name. Later registrations win.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            tracing::warn!(plugin = %name, "plugin re-registered, previous instance replaced");
        }
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    /// Look up and downcast a plugin.
    pub fn get_as<T: Plugin>(&self, name: &str) -> Option<&T> {
        self.plugins.get(name)?.as_any().downcast_ref::<T>()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("names", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mailer {
        from: String,
    }

    impl Plugin for Mailer {
        fn name(&self) -> &str {
            "mailer"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_register_and_downcast() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(Mailer {
            from: "noreply@example.com".into(),
        }));
        assert_eq!(registry.len(), 1);
        let mailer = registry.get_as::<Mailer>("mailer").unwrap();
        assert_eq!(mailer.from, "noreply@example.com");
        assert!(registry.get_as::<Mailer>("missing").is_none());
    }
}
