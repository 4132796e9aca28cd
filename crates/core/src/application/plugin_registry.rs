// Plugin registry - factories keyed by plugin identifier

use crate::domain::{PluginId, PluginType};
use crate::port::{Plugin, PluginError, PluginParameter};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Builds a fresh plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Metadata of a registered plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub id: PluginId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub plugin_type: PluginType,
    pub parameters: Vec<PluginParameter>,
}

#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<PluginId, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `id`
    pub fn register<F>(&mut self, id: impl Into<PluginId>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> Vec<PluginId> {
        let mut ids: Vec<_> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fresh instance with `parameters` validated and applied
    pub fn instantiate(
        &self,
        id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        let mut plugin = factory();
        plugin.set_parameter_values(parameters)?;
        Ok(plugin)
    }

    pub fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        let plugin = (self.factories.get(id)?)();
        Some(PluginDescriptor {
            id: id.to_string(),
            name: plugin.name().to_string(),
            description: plugin.description().to_string(),
            version: plugin.version().to_string(),
            plugin_type: plugin.plugin_type(),
            parameters: plugin.parameters(),
        })
    }
}
