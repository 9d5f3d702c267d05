// Component registry.
//
// A task's `module` field is an opaque key into this registry, resolved at
// execution time. Components register themselves under dotted keys and
// receive the process context when invoked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use maestro_core::error::{MaestroError, Result};
use maestro_core::models::TaskResult;

use crate::catalog;
use crate::process::Process;

/// A pluggable computation: one node of a workflow.
#[async_trait]
pub trait Component: Send + Sync {
    /// Registry key, e.g. `"maestro.catalog.ImportFile"`.
    fn module(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Run the component against its process context. Parameters and
    /// upstream inputs are reached through `pcs`.
    async fn execute(&self, pcs: &Process) -> Result<TaskResult>;
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component").field("module", &self.module()).finish()
    }
}

/// Lookup table from module key to component implementation.
#[derive(Default)]
pub struct ComponentRegistry {
    components: HashMap<&'static str, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in catalog.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(catalog::RevokeExecution));
        registry.register(Arc::new(catalog::DynamicParameter));
        registry.register(Arc::new(catalog::ImportFile));
        registry.register(Arc::new(catalog::ImportTsv));
        registry.register(Arc::new(catalog::ReadTsv));
        registry
    }

    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.insert(component.module(), component);
    }

    /// Resolve a module key; unknown keys surface as `ComponentNotFound`.
    pub fn get(&self, module: &str) -> Result<Arc<dyn Component>> {
        self.components
            .get(module)
            .cloned()
            .ok_or_else(|| MaestroError::ComponentNotFound(module.to_string()))
    }

    pub fn modules(&self) -> Vec<&'static str> {
        self.components.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_resolvable() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.get("maestro.catalog.RevokeExecution").is_ok());
        assert!(registry.get("maestro.catalog.ImportFile").is_ok());
        assert!(registry.get("maestro.catalog.ImportTSV").is_ok());
        assert!(registry.get("maestro.catalog.ReadTSV").is_ok());
        assert!(registry.get("maestro.catalog.DynamicParameter").is_ok());
    }

    #[test]
    fn unknown_modules_surface_as_component_not_found() {
        let registry = ComponentRegistry::with_builtins();
        let err = registry.get("user.components.Missing").unwrap_err();
        assert!(matches!(err, MaestroError::ComponentNotFound(_)));
    }
}
