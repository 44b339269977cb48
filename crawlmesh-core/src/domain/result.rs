//! Task result domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::meta::TaskMeta;

/// Outcome of one task execution
///
/// Flattened into the result object as either an `items` or an `error` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Items(Vec<Value>),
    Error(String),
}

/// Result of a task execution
///
/// Produced by a worker, queued by the coordinator in the owning client's
/// mailbox and consumed once by the crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub client_id: String,
    pub worker_id: String,
    pub task_name: String,
    /// Whether the emitting worker still had spare capacity
    pub status: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub meta: TaskMeta,
}

impl TaskResult {
    /// Builds a result for `meta` with the reserved fields filled in from it
    pub fn new(
        meta: TaskMeta,
        worker_id: impl Into<String>,
        status: bool,
        start_time: DateTime<Utc>,
        outcome: TaskOutcome,
    ) -> Self {
        Self {
            task_id: meta.id.clone(),
            client_id: meta.client_id.clone(),
            worker_id: worker_id.into(),
            task_name: meta.task_name.clone(),
            status,
            start_time,
            end_time: Utc::now(),
            outcome,
            meta,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Items(_))
    }

    pub fn items(&self) -> Option<&[Value]> {
        match &self.outcome {
            TaskOutcome::Items(items) => Some(items),
            TaskOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Items(_) => None,
            TaskOutcome::Error(message) => Some(message),
        }
    }
}
