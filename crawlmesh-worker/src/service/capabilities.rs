//! Capabilities service
//!
//! Reports which host modules this worker offers to task scripts. Bundles
//! list the modules they need as `dependencies`; a bundle asking for a
//! module the worker lacks is not loaded.

use crawlmesh_lua::ModuleRegistry;
use std::collections::BTreeSet;
use tracing::info;

/// Service trait for capability discovery and validation
pub trait CapabilitiesService: Send + Sync {
    /// All capabilities available on this worker, sorted
    fn discover(&self) -> Vec<String>;

    /// Requirements this worker cannot satisfy
    fn missing(&self, requires: &[String]) -> Vec<String>;

    /// Checks if this worker has all required capabilities
    fn check_compatibility(&self, requires: &[String]) -> bool {
        self.missing(requires).is_empty()
    }
}

/// Capabilities backed by the host modules of a [`ModuleRegistry`]
pub struct StandardCapabilitiesService {
    modules: BTreeSet<String>,
}

impl StandardCapabilitiesService {
    pub fn new(modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_registry(registry: &ModuleRegistry) -> Self {
        let service = Self::new(registry.ids());
        info!("Discovered {} capabilities", service.modules.len());
        service
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> Vec<String> {
        self.modules.iter().cloned().collect()
    }

    fn missing(&self, requires: &[String]) -> Vec<String> {
        requires
            .iter()
            .filter(|module| !self.modules.contains(module.as_str()))
            .cloned()
            .collect()
    }
}
