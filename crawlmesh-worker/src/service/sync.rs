//! Bundle synchronization
//!
//! Pulls a client's bundle when the coordinator reports this worker out of
//! date, unpacks it under the worker directory and (re)loads its tasks.
//! Also drops a client's tasks and files once the client is closed.

use anyhow::{Context, Result, bail};
use crawlmesh_client::CoordinatorClient;
use crawlmesh_core::{BundleManifest, RetryPolicy, retry, unpack_archive};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::lua::modules::HttpModule;
use crate::lua::task::LuaTaskFactory;
use crate::registry::{TaskEntry, TaskRegistry};
use crate::service::CapabilitiesService;

const PULL_ATTEMPTS: u32 = 3;

/// Keeps the local task registry in step with the coordinator's bundles
pub struct BundleSync {
    worker_id: String,
    worker_dir: PathBuf,
    client: Arc<CoordinatorClient>,
    registry: Arc<TaskRegistry>,
    capabilities: Arc<dyn CapabilitiesService>,
    http: HttpModule,
    retry_delay: Duration,
}

impl BundleSync {
    pub fn new(
        worker_id: String,
        worker_dir: PathBuf,
        client: Arc<CoordinatorClient>,
        registry: Arc<TaskRegistry>,
        capabilities: Arc<dyn CapabilitiesService>,
        http: HttpModule,
        retry_delay: Duration,
    ) -> Self {
        Self {
            worker_id,
            worker_dir,
            client,
            registry,
            capabilities,
            http,
            retry_delay,
        }
    }

    fn archive_path(&self, client_id: &str) -> PathBuf {
        self.worker_dir.join(format!("{}.zip", client_id))
    }

    fn bundle_dir(&self, client_id: &str) -> PathBuf {
        self.worker_dir.join(client_id)
    }

    /// Pull, unpack and load the current bundle of `client_id`
    pub async fn sync(&self, client_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.worker_dir)
            .await
            .context("Failed to create worker directory")?;

        let archive = self.archive_path(client_id);
        let bytes = retry(
            RetryPolicy::attempts(PULL_ATTEMPTS, self.retry_delay),
            "PullBundle",
            || self.client.pull_bundle(client_id, &self.worker_id, &archive),
        )
        .await
        .with_context(|| format!("Failed to pull bundle of {}", client_id))?;

        info!("Pulled bundle of {} ({} bytes)", client_id, bytes);

        let bundle_dir = self.bundle_dir(client_id);
        let registry = self.registry.clone();
        let capabilities = self.capabilities.clone();
        let http = self.http.clone();
        let owned_id = client_id.to_string();

        let loaded = tokio::task::spawn_blocking(move || {
            unpack_archive(&archive, &bundle_dir)
                .with_context(|| format!("Failed to unpack bundle of {}", owned_id))?;
            let manifest = BundleManifest::load(&bundle_dir)
                .with_context(|| format!("Invalid manifest in bundle of {}", owned_id))?;

            let missing = capabilities.missing(&manifest.dependencies);
            if !missing.is_empty() {
                // Tasks of an unusable bundle must report as missing
                registry.remove_client(&owned_id);
                bail!(
                    "Bundle of {} needs unavailable modules: {}",
                    owned_id,
                    missing.join(", ")
                );
            }

            let entries = task_entries(&bundle_dir, &manifest, &http)?;
            let count = entries.len();
            if let Err(e) = registry.install(&owned_id, entries) {
                registry.remove_client(&owned_id);
                return Err(e);
            }
            Ok(count)
        })
        .await
        .context("Bundle loading aborted")??;

        info!("Loaded {} task(s) of {}", loaded, client_id);
        Ok(())
    }

    /// Unload the tasks of a closed client and delete its files
    pub async fn drop_client(&self, client_id: &str) {
        let registry = self.registry.clone();
        let owned_id = client_id.to_string();
        let removed = tokio::task::spawn_blocking(move || registry.remove_client(&owned_id))
            .await
            .unwrap_or(0);

        info!("Client {} closed, dropped {} task(s)", client_id, removed);

        if let Err(e) = remove_files(&self.archive_path(client_id), &self.bundle_dir(client_id)).await
        {
            warn!("Failed to delete files of {}: {:#}", client_id, e);
        }
    }
}

fn task_entries(
    bundle_dir: &Path,
    manifest: &BundleManifest,
    http: &HttpModule,
) -> Result<Vec<TaskEntry>> {
    manifest
        .tasks
        .iter()
        .map(|(task_name, spec)| {
            let factory = LuaTaskFactory::load(
                bundle_dir,
                &manifest.client_id,
                task_name,
                &spec.module,
                http,
            )?;
            Ok(TaskEntry {
                task_name: task_name.clone(),
                max_threads: spec.max_threads,
                factory: Arc::new(factory),
            })
        })
        .collect()
}

async fn remove_files(archive: &Path, bundle_dir: &Path) -> Result<()> {
    match tokio::fs::remove_file(archive).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    match tokio::fs::remove_dir_all(bundle_dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::task_modules;
    use crate::service::StandardCapabilitiesService;
    use crawlmesh_core::{MANIFEST_FILE, pack_dir};
    use tokio::runtime::Handle;

    fn write_bundle(dir: &Path, dependencies: &str) {
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!(
                r#"{{"client_id": "t1", "dependencies": {}, "tasks": {{"echo": {{"max_threads": 2, "module": "echo.lua"}}}}}}"#,
                dependencies
            ),
        )
        .unwrap();
        std::fs::write(
            dir.join("echo.lua"),
            "return task.define { name = 'echo', max_threads = 2, request = function(meta) return meta end }",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_task_entries_follow_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "[]");

        let http = HttpModule::new(reqwest::Client::new(), Handle::current());
        let manifest = BundleManifest::load(dir.path()).unwrap();
        let entries = task_entries(dir.path(), &manifest, &http).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_name, "echo");
        assert_eq!(entries[0].max_threads, 2);
        assert!(entries[0].factory.create().is_ok());
    }

    #[tokio::test]
    async fn test_missing_module_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "[]");
        std::fs::remove_file(dir.path().join("echo.lua")).unwrap();

        let http = HttpModule::new(reqwest::Client::new(), Handle::current());
        let manifest = BundleManifest::load(dir.path()).unwrap();
        assert!(task_entries(dir.path(), &manifest, &http).is_err());
    }

    #[tokio::test]
    async fn test_remove_files_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        write_bundle(&staging, r#"["json"]"#);

        let archive = dir.path().join("t1.zip");
        pack_dir(&staging, &archive).unwrap();
        let bundle_dir = dir.path().join("t1");
        unpack_archive(&archive, &bundle_dir).unwrap();

        remove_files(&archive, &bundle_dir).await.unwrap();
        assert!(!archive.exists());
        assert!(!bundle_dir.exists());
        remove_files(&archive, &bundle_dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_modules_cover_bundle_dependencies() {
        let http = HttpModule::new(reqwest::Client::new(), Handle::current());
        let capabilities = StandardCapabilitiesService::from_registry(&task_modules("capabilities", &http));
        assert!(capabilities.check_compatibility(&["json".to_string(), "http".to_string()]));
    }
}
