//! Crawlmesh Coordinator Client
//!
//! A type-safe HTTP client for the coordinator RPC surface.
//!
//! Crawlers use it to push bundles, submit metas and collect results; workers
//! use it to poll for work, pull bundles and report results.
//!
//! # Example
//!
//! ```no_run
//! use crawlmesh_client::CoordinatorClient;
//! use crawlmesh_core::{Dispatch, TaskMeta};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!
//!     let meta = TaskMeta::new("t1", "echo", serde_json::Map::new());
//!     let code = client.add_meta(&meta).await?;
//!     println!("AddMeta: {}", code);
//!
//!     if let Dispatch::Task(meta) = client.get_meta("w1").await? {
//!         println!("Got task {}", meta.id);
//!     }
//!     Ok(())
//! }
//! ```

mod admin;
mod bundles;
pub mod error;
mod tasks;

pub use error::{ClientError, Result};

use crawlmesh_core::RpcReply;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the coordinator RPC surface
///
/// Methods are organized into groups:
/// - Bundles (push, pull)
/// - Tasks (add meta, get meta, report and fetch results, delete client)
/// - Admin (health, stats)
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// # Example
    /// ```
    /// use crawlmesh_client::CoordinatorClient;
    ///
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new coordinator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rpc_url(&self, operation: &str) -> String {
        format!("{}/rpc/{}", self.base_url, operation)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Turn a failed HTTP status into an error, keeping the reply message if any
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<RpcReply>(&error_text)
            .ok()
            .and_then(|reply| reply.message)
            .unwrap_or(error_text);

        Err(ClientError::api_error(status.as_u16(), message))
    }

    /// Handle an RPC response and decode its reply envelope
    async fn handle_reply(&self, response: reqwest::Response) -> Result<RpcReply> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse RPC reply: {}", e)))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

/// Decode the `data` payload of a reply
fn reply_data<T: DeserializeOwned>(reply: RpcReply) -> Result<T> {
    let data = reply.data.ok_or_else(|| {
        ClientError::ParseError(format!("{} reply carries no data", reply.code))
    })?;

    serde_json::from_value(data)
        .map_err(|e| ClientError::ParseError(format!("Invalid reply data: {}", e)))
}

/// Error for a reply code the call does not expect
fn rejected(reply: RpcReply) -> ClientError {
    ClientError::Rejected {
        code: reply.code,
        message: reply.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlmesh_core::ResultCode;

    #[test]
    fn test_client_creation() {
        let client = CoordinatorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = CoordinatorClient::new("http://localhost:8080/");
        assert_eq!(client.rpc_url("GetMeta"), "http://localhost:8080/rpc/GetMeta");
    }

    #[test]
    fn test_reply_data_requires_payload() {
        let reply = RpcReply::success();
        assert!(matches!(
            reply_data::<u64>(reply),
            Err(ClientError::ParseError(_))
        ));

        let reply = RpcReply::success().with_data(serde_json::json!(7));
        assert_eq!(reply_data::<u64>(reply).unwrap(), 7);
    }

    #[test]
    fn test_rejected_keeps_code() {
        let err = rejected(RpcReply::error("disk full"));
        assert_eq!(err.rejection(), Some(ResultCode::Error));
    }
}
