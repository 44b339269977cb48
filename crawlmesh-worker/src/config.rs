//! Worker configuration
//!
//! Defines all configurable parameters for the worker including
//! backoff intervals, execution limits and coordinator connection settings.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Worker configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Coordinator base URL (e.g., "http://localhost:8080")
    pub coordinator_url: String,

    /// Directory holding pulled archives and unpacked bundles
    pub worker_dir: PathBuf,

    /// Max tasks executing at the same time
    pub max_parallel_tasks: usize,

    /// Sleep after the coordinator reports an empty queue
    pub empty_backoff: Duration,

    /// Sleep between two attempts of a failed RPC
    pub retry_delay: Duration,

    /// Timeout of requests made by task scripts, and of coordinator connects
    pub http_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, coordinator_url: String, worker_dir: PathBuf) -> Self {
        Self {
            worker_id,
            coordinator_url,
            worker_dir,
            max_parallel_tasks: 10,
            empty_backoff: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(3000),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (optional, default: random UUID)
    /// - COORDINATOR_URL (optional, default: http://localhost:8080)
    /// - WORKER_DIR (optional, default: $HOME/.crawlmesh/worker)
    /// - MAX_PARALLEL_TASKS (optional, default: 10)
    /// - EMPTY_BACKOFF_MS (optional, default: 1000)
    /// - RETRY_DELAY_MS (optional, default: 3000)
    /// - HTTP_TIMEOUT_SECS (optional, default: 30)
    ///
    /// Unset variables fall back to defaults, malformed ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let worker_id = std::env::var("WORKER_ID").unwrap_or(defaults.worker_id);
        let coordinator_url =
            std::env::var("COORDINATOR_URL").unwrap_or(defaults.coordinator_url);
        let worker_dir = std::env::var("WORKER_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.worker_dir);

        Ok(Self {
            worker_id,
            coordinator_url,
            worker_dir,
            max_parallel_tasks: env_or("MAX_PARALLEL_TASKS", defaults.max_parallel_tasks)?,
            empty_backoff: env_or("EMPTY_BACKOFF_MS", 1000).map(Duration::from_millis)?,
            retry_delay: env_or("RETRY_DELAY_MS", 3000).map(Duration::from_millis)?,
            http_timeout: env_or("HTTP_TIMEOUT_SECS", 30).map(Duration::from_secs)?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.worker_dir.as_os_str().is_empty() {
            anyhow::bail!("worker_dir cannot be empty");
        }

        if self.max_parallel_tasks == 0 {
            anyhow::bail!("max_parallel_tasks must be greater than 0");
        }

        if self.http_timeout.is_zero() {
            anyhow::bail!("http_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
            PathBuf::from(home).join(".crawlmesh").join("worker"),
        )
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_parallel_tasks, 10);
        assert_eq!(config.empty_backoff, Duration::from_secs(1));
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert!(config.worker_dir.ends_with(".crawlmesh/worker"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_worker_ids_are_unique() {
        assert_ne!(Config::default().worker_id, Config::default().worker_id);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.worker_id = String::new();
        assert!(config.validate().is_err());
        config.worker_id = "w1".to_string();

        config.coordinator_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());
        config.coordinator_url = "http://localhost:8080".to_string();

        config.max_parallel_tasks = 0;
        assert!(config.validate().is_err());
        config.max_parallel_tasks = 1;

        assert!(config.validate().is_ok());
    }
}
