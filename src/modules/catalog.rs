//! Compiled-in module factories
//!
//! A module file names a `kind`; the catalog maps each kind to the factory
//! that builds an instance from the file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::builtin;
use super::manager::ModuleOrigin;
use super::manifest::ModuleManifest;
use super::traits::Module;
use super::ModuleError;

/// Everything a factory needs to build a module instance
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// Module id (file stem)
    pub id: String,
    pub origin: ModuleOrigin,
    pub path: PathBuf,
    pub manifest: ModuleManifest,
}

/// Builds a module instance from its spec
pub type ModuleFactory =
    Arc<dyn Fn(ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

/// Table of known module kinds
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every module kind shipped with the bot
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("settings", builtin::settings::create);
        catalog.register("hello", builtin::hello::create);
        catalog.register("module_list", builtin::module_list::create);
        catalog.register("time_info", builtin::time_info::create);
        catalog.register("member_info", builtin::member_info::create);
        catalog
    }

    /// Register (or replace) a factory for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Known kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build a module instance
    pub fn create(&self, spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
        let factory = self
            .factories
            .get(&spec.manifest.kind)
            .ok_or_else(|| ModuleError::UnknownKind(spec.manifest.kind.clone()))?;
        factory(spec)
    }
}
