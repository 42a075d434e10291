//! Module registry seam.
//!
//! The executor only needs lookup by id; how modules are discovered, loaded,
//! or bound is a concern for the host application. [`InMemoryRegistry`] is
//! the bundled implementation for processes that assemble their module set in
//! code.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::module::Module;

/// Lookup of modules by id.
pub trait ModuleRegistry: Send + Sync {
    /// Resolve a module id, or `None` when absent.
    fn get(&self, module_id: &str) -> Option<Arc<dyn Module>>;

    /// All registered ids, in no particular order.
    fn ids(&self) -> Vec<String>;
}

/// Registry backed by a shared map.
#[derive(Default)]
pub struct InMemoryRegistry {
    modules: RwLock<FxHashMap<String, Arc<dyn Module>>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `module_id`, replacing any previous binding.
    pub fn register(&self, module_id: impl Into<String>, module: Arc<dyn Module>) {
        self.modules.write().insert(module_id.into(), module);
    }

    /// Remove a binding; idempotent.
    pub fn remove(&self, module_id: &str) {
        self.modules.write().remove(module_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ModuleRegistry for InMemoryRegistry {
    fn get(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().get(module_id).cloned()
    }

    fn ids(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }
}
