//! Name-indexed lookup of tool adapters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use waypoint_contract::{ToolAdapter, ToolDescriptor};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool id already registered: {0}")]
    ToolIdConflict(String),
}

/// Shared name → adapter mapping. Cheap to clone.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ToolAdapter>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ToolAdapter>) -> Result<(), RegistryError> {
        let id = adapter.descriptor().id;
        let mut tools = self.inner.write().expect("registry lock poisoned");
        if tools.contains_key(&id) {
            return Err(RegistryError::ToolIdConflict(id));
        }
        tools.insert(id, adapter);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Descriptors of every registered tool, sorted by id.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|adapter| adapter.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_contract::testing::StaticTool;
    use waypoint_contract::JsonMap;

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(StaticTool::new("echo", JsonMap::new())))
            .unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("ghost").is_none());
        assert_eq!(registry.list()[0].id, "echo");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(StaticTool::new("echo", JsonMap::new())))
            .unwrap();
        let err = registry
            .register(Arc::new(StaticTool::new("echo", JsonMap::new())))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ToolIdConflict(id) if id == "echo"));
    }
}
