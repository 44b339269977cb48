//! Crawlmesh Worker
//!
//! An executor process that runs crawl tasks in sandboxed Lua environments.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Lua: host modules, log sink and Lua task instances
//! - Registry: loaded task types with per-task concurrency and pooling
//! - Services: bundle synchronization, execution, capability discovery
//! - Scheduler: the `GetMeta` polling state machine
//!
//! The worker polls the coordinator for metas, pulls bundles it is missing,
//! executes tasks off the polling loop and reports every result.

pub mod config;
pub mod lua;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod task;

use anyhow::{Context, Result};
use crawlmesh_client::CoordinatorClient;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

use crate::config::Config;
use crate::lua::modules::HttpModule;
use crate::lua::task_modules;
use crate::registry::TaskRegistry;
use crate::scheduler::TaskPoller;
use crate::service::{
    BundleSync, CapabilitiesService, ExecutionService, StandardCapabilitiesService,
    StandardExecutionService,
};

/// A fully wired worker
pub struct Worker {
    poller: TaskPoller,
    registry: Arc<TaskRegistry>,
}

impl Worker {
    /// Wire the services described by `config`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let coordinator_http = reqwest::Client::builder()
            .connect_timeout(config.http_timeout)
            .build()
            .context("Failed to build coordinator HTTP client")?;
        let client = Arc::new(CoordinatorClient::with_client(
            config.coordinator_url.clone(),
            coordinator_http,
        ));

        let script_http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to build task HTTP client")?;
        let http = HttpModule::new(script_http, Handle::current());

        let capabilities: Arc<dyn CapabilitiesService> = Arc::new(
            StandardCapabilitiesService::from_registry(&task_modules("capabilities", &http)),
        );
        for capability in capabilities.discover() {
            info!("  - {}", capability);
        }

        let registry = Arc::new(TaskRegistry::new());
        let sync = Arc::new(BundleSync::new(
            config.worker_id.clone(),
            config.worker_dir.clone(),
            Arc::clone(&client),
            Arc::clone(&registry),
            capabilities,
            http,
            config.retry_delay,
        ));
        let execution: Arc<dyn ExecutionService> =
            Arc::new(StandardExecutionService::new(Arc::clone(&registry)));

        Ok(Self {
            poller: TaskPoller::new(config, client, sync, execution),
            registry,
        })
    }

    pub fn poller(&self) -> &TaskPoller {
        &self.poller
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Poll until the process is stopped
    pub async fn run(&self) -> Result<()> {
        self.poller.run().await
    }

    /// Stop every loaded task instance
    pub async fn shutdown(&self) {
        let registry = Arc::clone(&self.registry);
        if let Err(e) = tokio::task::spawn_blocking(move || registry.shutdown()).await {
            tracing::error!("Task shutdown aborted: {}", e);
        }
    }
}
