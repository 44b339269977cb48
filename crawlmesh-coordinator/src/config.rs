//! Coordinator configuration
//!
//! Bind address, bundle storage location and the admission ceilings of the
//! route table.

use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the RPC server listens on (e.g., "0.0.0.0:8080")
    pub bind_addr: String,

    /// Directory holding one archive and one unpacked bundle per client
    pub container_dir: PathBuf,

    /// Maximum number of live client sessions
    pub max_clients: usize,

    /// Global ceiling of queued metas across every client
    pub max_pending_tasks: usize,

    /// Largest accepted bundle upload, in bytes
    pub max_bundle_bytes: usize,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String, container_dir: PathBuf) -> Self {
        Self {
            bind_addr,
            container_dir,
            max_clients: 50,
            max_pending_tasks: 1000,
            max_bundle_bytes: 256 * 1024 * 1024,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - COORDINATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - CONTAINER_DIR (optional, default: $HOME/.crawlmesh/container)
    /// - MAX_CLIENTS (optional, default: 50)
    /// - MAX_PENDING_TASKS (optional, default: 1000)
    /// - MAX_BUNDLE_BYTES (optional, default: 256 MiB)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("COORDINATOR_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let container_dir = std::env::var("CONTAINER_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.container_dir);

        Ok(Self {
            bind_addr,
            container_dir,
            max_clients: env_or("MAX_CLIENTS", defaults.max_clients)?,
            max_pending_tasks: env_or("MAX_PENDING_TASKS", defaults.max_pending_tasks)?,
            max_bundle_bytes: env_or("MAX_BUNDLE_BYTES", defaults.max_bundle_bytes)?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.container_dir.as_os_str().is_empty() {
            anyhow::bail!("container_dir cannot be empty");
        }

        if self.max_clients == 0 {
            anyhow::bail!("max_clients must be greater than 0");
        }

        if self.max_pending_tasks == 0 {
            anyhow::bail!("max_pending_tasks must be greater than 0");
        }

        if self.max_bundle_bytes == 0 {
            anyhow::bail!("max_bundle_bytes must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(
            "0.0.0.0:8080".to_string(),
            PathBuf::from(home).join(".crawlmesh").join("container"),
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
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.max_pending_tasks, 1000);
        assert!(config.container_dir.ends_with(".crawlmesh/container"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.max_pending_tasks = 0;
        assert!(config.validate().is_err());

        config.max_pending_tasks = 10;
        config.max_clients = 0;
        assert!(config.validate().is_err());

        config.max_clients = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_or_rejects_malformed_numbers() {
        // Names are unique to this test
        unsafe {
            std::env::set_var("CRAWLMESH_TEST_MAX_PENDING_BAD", "abc");
            std::env::set_var("CRAWLMESH_TEST_MAX_PENDING_GOOD", "25");
        }

        let err = env_or("CRAWLMESH_TEST_MAX_PENDING_BAD", 1000usize).unwrap_err();
        assert!(err.to_string().contains("CRAWLMESH_TEST_MAX_PENDING_BAD"));
        assert_eq!(env_or("CRAWLMESH_TEST_MAX_PENDING_GOOD", 1000usize).unwrap(), 25);
        assert_eq!(env_or("CRAWLMESH_TEST_MAX_PENDING_UNSET", 1000usize).unwrap(), 1000);
    }
}
