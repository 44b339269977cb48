//! Task poller
//!
//! Explicit state machine around `GetMeta`:
//! `IDLE -> {DISPATCHED | EMPTY | NOT_UPDATED | CLOSED} -> IDLE`.
//!
//! A permit of the execution semaphore is taken before polling, so the
//! worker never asks for more work than it can run. Each dispatched meta
//! runs on its own task; polling never waits on execution.

use anyhow::{Context, Result};
use chrono::Utc;
use crawlmesh_client::CoordinatorClient;
use crawlmesh_core::{Dispatch, RetryPolicy, TaskMeta, TaskResult, retry};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::service::{BundleSync, ExecutionService};

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Dispatched(String),
    Empty,
    Synced(Vec<String>),
    Closed(String),
}

/// Task poller that continuously polls for and executes metas
pub struct TaskPoller {
    config: Config,
    client: Arc<CoordinatorClient>,
    sync: Arc<BundleSync>,
    execution: Arc<dyn ExecutionService>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

impl TaskPoller {
    /// Creates a new task poller
    pub fn new(
        config: Config,
        client: Arc<CoordinatorClient>,
        sync: Arc<BundleSync>,
        execution: Arc<dyn ExecutionService>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_tasks));
        Self {
            config,
            client,
            sync,
            execution,
            semaphore,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting task poller (max parallel tasks: {}, empty backoff: {:?})",
            self.config.max_parallel_tasks, self.config.empty_backoff
        );

        loop {
            match self.poll_once().await {
                Ok(PollStep::Empty) => {
                    debug!("No task available");
                    tokio::time::sleep(self.config.empty_backoff).await;
                }
                Ok(step) => debug!("Poll step: {:?}", step),
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Performs a single poll cycle
    pub async fn poll_once(&self) -> Result<PollStep> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Execution semaphore closed")?;

        let dispatch = retry(
            RetryPolicy::forever(self.config.retry_delay),
            "GetMeta",
            || self.client.get_meta(&self.config.worker_id),
        )
        .await
        .context("Failed to poll coordinator")?;

        match dispatch {
            Dispatch::Task(meta) => {
                let id = meta.id.clone();
                self.spawn_task(meta, permit);
                Ok(PollStep::Dispatched(id))
            }
            Dispatch::Empty => Ok(PollStep::Empty),
            Dispatch::NotUpdated(clients) => {
                drop(permit);
                for client_id in &clients {
                    if let Err(e) = self.sync.sync(client_id).await {
                        error!("Failed to synchronize {}: {:#}", client_id, e);
                    }
                }
                Ok(PollStep::Synced(clients))
            }
            Dispatch::Closed(client_id) => {
                drop(permit);
                self.sync.drop_client(&client_id).await;
                Ok(PollStep::Closed(client_id))
            }
        }
    }

    /// Number of metas currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Spawns a task executing one meta and reporting its result
    fn spawn_task(&self, meta: TaskMeta, permit: OwnedSemaphorePermit) {
        let client = Arc::clone(&self.client);
        let execution = Arc::clone(&self.execution);
        let in_flight = Arc::clone(&self.in_flight);
        let worker_id = self.config.worker_id.clone();
        let capacity = self.config.max_parallel_tasks;
        let policy = RetryPolicy::forever(self.config.retry_delay);

        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let start_time = Utc::now();
            info!("Executing {} ({})", meta.id, meta.task_key());

            let outcome = execution.execute(&meta).await;

            // Capacity counts this task, which is still in flight
            let status = in_flight.load(Ordering::SeqCst) < capacity;
            let result = TaskResult::new(meta, worker_id, status, start_time, outcome);

            if let Err(e) = retry(policy, "OnResult", || client.on_result(&result)).await {
                error!("Failed to report result of {}: {}", result.task_id, e);
            }

            info!(
                "Reported {} ({})",
                result.task_id,
                if result.is_success() { "success" } else { "failure" }
            );

            in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }
}
