//! Fixed-delay retry for remote calls
//!
//! Every RPC made by the crawler and the worker goes through [`retry`]. Calls
//! are attempted until they succeed or the policy runs out of attempts,
//! sleeping a fixed delay between attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often and how patiently a call is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, `None` retries forever
    pub max_attempts: Option<u32>,
    /// Sleep between two attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    pub fn attempts(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_secs(3))
    }
}

/// Runs `op` until it succeeds or `policy` is exhausted
///
/// The last error is returned once the attempts are used up. `what` names the
/// call in log lines.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", what, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    error!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }

                warn!(
                    "{} failed (attempt {}): {}, retrying in {:?}",
                    what, attempt, e, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
