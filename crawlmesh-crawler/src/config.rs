//! Crawler configuration
//!
//! Coordinator connection, identity of the client and the pacing of
//! submission and result polling.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Crawler configuration
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// URL of the coordinator service
    pub coordinator_url: String,

    /// Identity of this client, also the name of its bundle
    pub client_id: String,

    /// Directory the bundle is assembled in before packing
    pub staging_dir: PathBuf,

    /// Sleep between retries of a failed call or a full queue
    pub retry_delay: Duration,

    /// Sleep between two `GetResult` calls that returned nothing
    pub poll_interval: Duration,

    /// How many times a failed meta is resubmitted before it is reported
    pub max_task_retries: u32,
}

impl CrawlerConfig {
    /// Creates a new configuration with defaults
    ///
    /// The staging directory defaults to `.crawlmesh/<client_id>` under the
    /// current directory.
    pub fn new(coordinator_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            coordinator_url: coordinator_url.into(),
            staging_dir: PathBuf::from(".crawlmesh").join(&client_id),
            client_id,
            retry_delay: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(100),
            max_task_retries: 3,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CLIENT_ID (required)
    /// - COORDINATOR_URL (optional, default: http://localhost:8080)
    /// - STAGING_DIR (optional, default: .crawlmesh/<client_id>)
    /// - RETRY_DELAY_MS (optional, default: 3000)
    /// - POLL_INTERVAL_MS (optional, default: 100)
    /// - MAX_TASK_RETRIES (optional, default: 3)
    pub fn from_env() -> anyhow::Result<Self> {
        let client_id = std::env::var("CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("CLIENT_ID environment variable not set"))?;
        let coordinator_url = std::env::var("COORDINATOR_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        let mut config = Self::new(coordinator_url, client_id);

        if let Ok(dir) = std::env::var("STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        config.retry_delay = env_or("RETRY_DELAY_MS", 3000).map(Duration::from_millis)?;
        config.poll_interval = env_or("POLL_INTERVAL_MS", 100).map(Duration::from_millis)?;
        config.max_task_retries = env_or("MAX_TASK_RETRIES", config.max_task_retries)?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.is_empty() {
            anyhow::bail!("client_id cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.staging_dir.as_os_str().is_empty() {
            anyhow::bail!("staging_dir cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080", "crawler")
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
