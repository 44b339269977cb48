//! Crawler runtime
//!
//! Owns one client session on the coordinator: pushes the staged bundle,
//! submits deduplicated metas, collects results and tears the session down
//! once nothing is left in flight.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use crawlmesh_client::CoordinatorClient;
use crawlmesh_core::{ResultCode, RetryPolicy, TaskMeta, TaskResult, retry};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::bundle::{BundleSpec, StagedBundle, stage};
use crate::config::CrawlerConfig;

/// What happened to a call to [`Crawler::add_task`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The meta was queued under this id
    Submitted(String),
    /// A meta with the same id was already submitted by this crawler
    Skipped(String),
}

/// A result as seen by the crawler
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Success(TaskResult),
    /// Failed and out of retries
    Failed(TaskResult),
    /// Failed and queued again
    Retried(TaskResult),
    /// Result of a task that is no longer in flight
    Duplicate(TaskResult),
}

/// Counters over the life of a crawler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub submitted: u64,
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Callbacks driven by [`Crawler::run`]
///
/// Handlers may submit further tasks through the crawler they receive.
/// Errors are logged and never stop the loop.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    /// Called once after the bundle is pushed, usually to seed the first tasks
    async fn on_start(&self, crawler: &Crawler) -> Result<()>;

    async fn on_success(&self, crawler: &Crawler, result: TaskResult) -> Result<()>;

    async fn on_failure(&self, _crawler: &Crawler, result: TaskResult) -> Result<()> {
        error!(
            "Task {} ({}) failed: {}",
            result.task_name,
            result.task_id,
            result.error().unwrap_or("unknown error")
        );
        Ok(())
    }
}

enum Polled {
    Result(TaskResult),
    Empty,
    SessionLost,
}

struct InFlight {
    meta: TaskMeta,
    attempts: u32,
}

pub struct Crawler {
    config: CrawlerConfig,
    client: CoordinatorClient,
    bundle: StagedBundle,
    archive: PathBuf,
    seen: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    stats: Mutex<CrawlStats>,
}

impl Crawler {
    /// Stage and pack the bundle described by `spec`
    ///
    /// Nothing is sent to the coordinator until [`Crawler::push`].
    pub fn new(config: CrawlerConfig, spec: &BundleSpec) -> Result<Self> {
        config.validate()?;

        let bundle = stage(spec, &config.client_id, &config.staging_dir)
            .with_context(|| format!("Failed to stage bundle for {}", config.client_id))?;
        let archive = bundle.pack()?;

        Ok(Self {
            client: CoordinatorClient::new(&config.coordinator_url),
            config,
            bundle,
            archive,
            seen: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CrawlStats::default()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn bundle(&self) -> &StagedBundle {
        &self.bundle
    }

    pub fn stats(&self) -> CrawlStats {
        *lock(&self.stats)
    }

    /// Number of submitted tasks without a final result yet
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn is_done(&self) -> bool {
        self.in_flight() == 0
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::forever(self.config.retry_delay)
    }

    // =============================================================================
    // Session
    // =============================================================================

    /// Upload the bundle, returning the version the coordinator assigned
    pub async fn push(&self) -> Result<u64> {
        let version = retry(self.retry_policy(), "PushBundle", || {
            self.client.push_bundle(&self.config.client_id, &self.archive)
        })
        .await?;

        info!(
            "Pushed bundle of {} as version {}",
            self.config.client_id, version
        );
        Ok(version)
    }

    /// Tear the session down on the coordinator
    pub async fn close(&self) -> Result<()> {
        retry(self.retry_policy(), "DelClient", || {
            self.client.del_client(&self.config.client_id)
        })
        .await?;

        info!("Closed client {}", self.config.client_id);
        Ok(())
    }

    // =============================================================================
    // Submission
    // =============================================================================

    /// Submit a task unless a meta with the same parameters was submitted before
    pub async fn add_task(&self, task_name: &str, params: Map<String, Value>) -> Result<Submission> {
        if !self.bundle.has_task(task_name) {
            bail!(
                "Task '{}' is not defined in the bundle of {}",
                task_name,
                self.config.client_id
            );
        }

        let meta = TaskMeta::new(&self.config.client_id, task_name, params);
        let id = meta.id.clone();

        if !lock(&self.seen).insert(id.clone()) {
            debug!("Skipping already submitted task {}", id);
            lock(&self.stats).skipped += 1;
            return Ok(Submission::Skipped(id));
        }

        lock(&self.in_flight).insert(
            id.clone(),
            InFlight {
                meta: meta.clone(),
                attempts: 0,
            },
        );
        lock(&self.stats).submitted += 1;

        self.submit(&meta).await?;
        Ok(Submission::Submitted(id))
    }

    async fn submit(&self, meta: &TaskMeta) -> Result<()> {
        loop {
            match self.send_meta(meta).await? {
                ResultCode::Success => return Ok(()),
                ResultCode::TaskQueueFull => {
                    warn!(
                        "Queue of {} is full, retrying in {:?}",
                        self.config.client_id, self.config.retry_delay
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                // The resubmission covers `meta` as it is in flight
                ResultCode::ClientNotFound => return self.recover().await,
                code => bail!("Unexpected AddMeta reply {}", code),
            }
        }
    }

    /// Re-push the bundle and resubmit every in-flight meta
    async fn recover(&self) -> Result<()> {
        loop {
            warn!(
                "Coordinator does not know {}, pushing the bundle again",
                self.config.client_id
            );
            self.push().await?;

            if self.resubmit_in_flight().await? {
                return Ok(());
            }
        }
    }

    /// Queue every in-flight meta again, `false` if the session vanished meanwhile
    async fn resubmit_in_flight(&self) -> Result<bool> {
        let pending: Vec<TaskMeta> = lock(&self.in_flight)
            .values()
            .map(|entry| entry.meta.clone())
            .collect();

        for meta in &pending {
            loop {
                match self.send_meta(meta).await? {
                    ResultCode::Success => break,
                    ResultCode::TaskQueueFull => tokio::time::sleep(self.config.retry_delay).await,
                    ResultCode::ClientNotFound => return Ok(false),
                    code => bail!("Unexpected AddMeta reply {}", code),
                }
            }
        }

        if !pending.is_empty() {
            info!("Resubmitted {} task(s)", pending.len());
        }
        Ok(true)
    }

    async fn send_meta(&self, meta: &TaskMeta) -> Result<ResultCode> {
        Ok(retry(self.retry_policy(), "AddMeta", || self.client.add_meta(meta)).await?)
    }

    // =============================================================================
    // Results
    // =============================================================================

    /// Fetch and classify the next result, `None` if nothing arrived yet
    ///
    /// Failed tasks are resubmitted until they reach `max_task_retries`. A
    /// session the coordinator lost is pushed again with every in-flight meta.
    pub async fn get_result(&self) -> Result<Option<Received>> {
        let polled = retry(self.retry_policy(), "GetResult", || async move {
            match self.client.get_result(&self.config.client_id).await {
                Ok(Some(result)) => Ok(Polled::Result(result)),
                Ok(None) => Ok(Polled::Empty),
                Err(e) if e.rejection() == Some(ResultCode::ClientNotFound) => {
                    Ok(Polled::SessionLost)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        let result = match polled {
            Polled::Result(result) => result,
            Polled::Empty => return Ok(None),
            Polled::SessionLost => {
                if !self.is_done() {
                    self.recover().await?;
                }
                return Ok(None);
            }
        };

        if result.is_success() {
            if lock(&self.in_flight).remove(&result.task_id).is_none() {
                return Ok(Some(Received::Duplicate(result)));
            }
            lock(&self.stats).succeeded += 1;
            return Ok(Some(Received::Success(result)));
        }

        let retry_meta = {
            let mut in_flight = lock(&self.in_flight);
            let Some(entry) = in_flight.get_mut(&result.task_id) else {
                return Ok(Some(Received::Duplicate(result)));
            };

            if entry.attempts < self.config.max_task_retries {
                entry.attempts += 1;
                Some(entry.meta.clone())
            } else {
                in_flight.remove(&result.task_id);
                None
            }
        };

        match retry_meta {
            Some(meta) => {
                warn!(
                    "Task {} failed ({}), resubmitting",
                    meta.id,
                    result.error().unwrap_or("unknown error")
                );
                lock(&self.stats).retried += 1;
                self.submit(&meta).await?;
                Ok(Some(Received::Retried(result)))
            }
            None => {
                lock(&self.stats).failed += 1;
                Ok(Some(Received::Failed(result)))
            }
        }
    }

    /// Push, seed through `handler`, drain results until nothing is in flight, close
    ///
    /// Tasks still in flight from an earlier session are queued again after
    /// the push.
    pub async fn run<H: ResultHandler + ?Sized>(&self, handler: &H) -> Result<CrawlStats> {
        self.push().await?;
        if !self.resubmit_in_flight().await? {
            self.recover().await?;
        }

        if let Err(e) = handler.on_start(self).await {
            error!("Start handler failed: {:#}", e);
        }

        loop {
            match self.get_result().await? {
                Some(Received::Success(result)) => {
                    let task_id = result.task_id.clone();
                    if let Err(e) = handler.on_success(self, result).await {
                        error!("Success handler failed for {}: {:#}", task_id, e);
                    }
                }
                Some(Received::Failed(result)) => {
                    let task_id = result.task_id.clone();
                    if let Err(e) = handler.on_failure(self, result).await {
                        error!("Failure handler failed for {}: {:#}", task_id, e);
                    }
                }
                Some(Received::Retried(_)) => {}
                Some(Received::Duplicate(result)) => {
                    debug!("Ignoring duplicate result for {}", result.task_id);
                }
                None if self.is_done() => break,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        self.close().await?;

        let stats = self.stats();
        info!(
            "Crawl of {} finished: {} succeeded, {} failed",
            self.config.client_id, stats.succeeded, stats.failed
        );
        Ok(stats)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: &str = r#"
        return task.define { name = "echo", max_threads = 1, request = function(meta) return meta end }
    "#;

    fn crawler(dir: &std::path::Path) -> Crawler {
        let script = dir.join("echo.lua");
        std::fs::write(&script, ECHO).unwrap();

        let mut config = CrawlerConfig::new("http://127.0.0.1:9", "t1");
        config.staging_dir = dir.join("t1");
        Crawler::new(config, &BundleSpec::new([script])).unwrap()
    }

    #[test]
    fn test_new_stages_and_packs() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = crawler(dir.path());

        assert_eq!(crawler.client_id(), "t1");
        assert!(crawler.bundle().has_task("echo"));
        assert!(dir.path().join("t1.zip").exists());
        assert!(crawler.is_done());
        assert_eq!(crawler.stats(), CrawlStats::default());
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = crawler(dir.path());

        let err = crawler.add_task("detail", Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("not defined"));
        assert!(crawler.is_done());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CrawlerConfig::new("localhost", "t1");
        config.staging_dir = dir.path().join("t1");
        assert!(Crawler::new(config, &BundleSpec::new(["echo.lua"])).is_err());
    }
}
