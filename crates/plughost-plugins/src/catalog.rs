//! Compiled-in table of plugin factories.
//!
//! A manifest on disk names a catalog entry; every load asks the factory for
//! a brand-new instance built from the freshly read manifest.

use std::collections::BTreeMap;
use std::sync::Arc;

use plughost_core::error::{PlugHostError, Result};

use crate::manifest::PluginManifest;
use crate::plugin::Plugin;

/// Builds a plugin instance from its manifest.
pub type PluginFactory =
    Arc<dyn Fn(&PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Registry of available plugin implementations, keyed by entry name.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory under `entry`, replacing any previous one.
    pub fn register<F>(&mut self, entry: &str, factory: F) -> &mut Self
    where
        F: Fn(&PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(entry.to_string(), Arc::new(factory));
        self
    }

    /// Builder-style [`Self::register`].
    pub fn with<F>(mut self, entry: &str, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(entry, factory);
        self
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    /// All entry names, sorted.
    pub fn entries(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a fresh instance for `entry`.
    pub fn instantiate(&self, entry: &str, manifest: &PluginManifest) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(entry)
            .ok_or_else(|| PlugHostError::Load(format!("Unknown plugin entry '{entry}'")))?;
        factory(manifest).map_err(|e| PlugHostError::Load(format!("Entry '{entry}': {e:#}")))
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entries", &self.entries())
            .finish()
    }
}
