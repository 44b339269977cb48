//! Code bundle manifest

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::archive::BundleError;

/// File name of the manifest at the root of every bundle
pub const MANIFEST_FILE: &str = "bundle.json";

/// Declarative description of a client's code bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub client_id: String,

    /// Host modules the task sources need on the worker
    #[serde(default, alias = "pip")]
    pub dependencies: Vec<String>,

    /// Data files, source path to destination inside the bundle
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    /// Task name to concurrency limit and entry point
    pub tasks: BTreeMap<String, TaskSpec>,
}

/// Per-task entry of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub max_threads: usize,
    /// Script path relative to the bundle root
    pub module: String,
}

impl BundleManifest {
    /// Checks the structural rules every bundle must follow
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.client_id.is_empty() {
            return Err(BundleError::InvalidManifest(
                "client_id cannot be empty".to_string(),
            ));
        }

        if self.tasks.is_empty() {
            return Err(BundleError::InvalidManifest(
                "bundle must declare at least one task".to_string(),
            ));
        }

        for (name, spec) in &self.tasks {
            if spec.max_threads == 0 {
                return Err(BundleError::InvalidManifest(format!(
                    "task '{}' must have a positive max_threads",
                    name
                )));
            }
            if !is_bundle_relative(&spec.module) {
                return Err(BundleError::InvalidManifest(format!(
                    "task '{}' module '{}' must be a relative path inside the bundle",
                    name, spec.module
                )));
            }
        }

        for destination in self.files.values() {
            if !is_bundle_relative(destination) {
                return Err(BundleError::InvalidManifest(format!(
                    "file destination '{}' must be a relative path inside the bundle",
                    destination
                )));
            }
        }

        Ok(())
    }

    /// Reads and validates the manifest of an unpacked bundle
    pub fn load(bundle_dir: &Path) -> Result<Self, BundleError> {
        let raw = std::fs::read(bundle_dir.join(MANIFEST_FILE))?;
        let manifest: Self = serde_json::from_slice(&raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Writes the manifest into a staging directory
    pub fn write(&self, bundle_dir: &Path) -> Result<(), BundleError> {
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(bundle_dir.join(MANIFEST_FILE), raw)?;
        Ok(())
    }
}

fn is_bundle_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
