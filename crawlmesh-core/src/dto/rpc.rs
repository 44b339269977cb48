//! RPC envelopes and result codes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::meta::TaskMeta;

/// Outcome code carried by every RPC reply
///
/// Serialized by name. The numeric values are stable and exposed through
/// [`ResultCode::as_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    Error = 1,
    TaskQueueFull = 2,
    ClientNotFound = 3,
    ClientIsFull = 4,
    TaskQueueEmpty = 5,
    WorkerNotUpdate = 6,
    ClientIsClosed = 7,
    ClientResultEmpty = 8,
}

impl ResultCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::Error => "ERROR",
            ResultCode::TaskQueueFull => "TASK_QUEUE_FULL",
            ResultCode::ClientNotFound => "CLIENT_NOT_FOUND",
            ResultCode::ClientIsFull => "CLIENT_IS_FULL",
            ResultCode::TaskQueueEmpty => "TASK_QUEUE_EMPTY",
            ResultCode::WorkerNotUpdate => "WORKER_NOT_UPDATE",
            ResultCode::ClientIsClosed => "CLIENT_IS_CLOSED",
            ResultCode::ClientResultEmpty => "CLIENT_RESULT_EMPTY",
        };
        f.write_str(name)
    }
}

/// Reply envelope returned by every unary RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub code: ResultCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcReply {
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            message: None,
            data: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResultCode::Error).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

/// What a worker should do next, as decided by one `GetMeta` call
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Run this meta
    Task(TaskMeta),
    /// Nothing runnable right now
    Empty,
    /// Pull these clients' bundles before polling again
    NotUpdated(Vec<String>),
    /// This client is gone, drop its task implementations
    Closed(String),
}

// =============================================================================
// Request Types
// =============================================================================

/// Query string of `PushBundle`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBundleQuery {
    pub client_id: String,
}

/// Body of `PullBundle`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullBundleRequest {
    pub client_id: String,
    pub worker_id: String,
}

/// Body of `GetMeta`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub worker_id: String,
}

/// Body of `GetResult` and `DelClient`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ResultCode::Success.as_u8(), 0);
        assert_eq!(ResultCode::Error.as_u8(), 1);
        assert_eq!(ResultCode::TaskQueueFull.as_u8(), 2);
        assert_eq!(ResultCode::ClientNotFound.as_u8(), 3);
        assert_eq!(ResultCode::ClientIsFull.as_u8(), 4);
        assert_eq!(ResultCode::TaskQueueEmpty.as_u8(), 5);
        assert_eq!(ResultCode::WorkerNotUpdate.as_u8(), 6);
        assert_eq!(ResultCode::ClientIsClosed.as_u8(), 7);
        assert_eq!(ResultCode::ClientResultEmpty.as_u8(), 8);
    }

    #[test]
    fn test_code_serializes_by_name() {
        let json = serde_json::to_string(&ResultCode::WorkerNotUpdate).unwrap();
        assert_eq!(json, "\"WORKER_NOT_UPDATE\"");
        assert_eq!(ResultCode::WorkerNotUpdate.to_string(), "WORKER_NOT_UPDATE");
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let json = serde_json::to_value(RpcReply::new(ResultCode::TaskQueueEmpty)).unwrap();
        assert_eq!(json, serde_json::json!({"code": "TASK_QUEUE_EMPTY"}));

        let reply: RpcReply = serde_json::from_value(json).unwrap();
        assert!(reply.message.is_none());
        assert!(!reply.is_success());
    }
}
