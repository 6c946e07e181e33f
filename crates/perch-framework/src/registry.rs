use crate::error::{FrameworkError, Result};
use crate::framework::FrameworkHandle;
use crate::plugins::Plugin;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds one plugin instance from its (optional) config blob and the
/// framework handle.
pub type PluginFactory =
    Arc<dyn Fn(Option<&serde_json::Value>, &FrameworkHandle) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Mapping from plugin name to factory. Consulted once, at framework
/// construction.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<String, PluginFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`. Duplicate names are rejected.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(Option<&serde_json::Value>, &FrameworkHandle) -> Result<Arc<dyn Plugin>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(FrameworkError::already_registered(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Fold `other` into this registry, rejecting duplicates.
    pub fn merge(&mut self, other: Registry) -> Result<()> {
        for (name, factory) in other.factories {
            if self.factories.contains_key(&name) {
                return Err(FrameworkError::already_registered(name));
            }
            self.factories.insert(name, factory);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PluginFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry
            .register("noop", |_, _| Ok(Arc::new(NoopPlugin) as Arc<dyn Plugin>))
            .unwrap();

        assert!(registry.contains("noop"));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry
            .register("noop", |_, _| Ok(Arc::new(NoopPlugin) as Arc<dyn Plugin>))
            .unwrap();

        let err = registry
            .register("noop", |_, _| Ok(Arc::new(NoopPlugin) as Arc<dyn Plugin>))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_merge_rejects_duplicates() {
        let mut a = Registry::new();
        a.register("noop", |_, _| Ok(Arc::new(NoopPlugin) as Arc<dyn Plugin>))
            .unwrap();

        let mut b = Registry::new();
        b.register("noop", |_, _| Ok(Arc::new(NoopPlugin) as Arc<dyn Plugin>))
            .unwrap();

        assert!(a.merge(b).is_err());
    }
}
