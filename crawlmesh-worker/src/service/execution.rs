//! Execution service
//!
//! Runs one dispatched meta through its task's stages:
//! - Lease an instance of `{client_id}_{task_name}` from the registry
//! - Run `request -> parse -> build` on a blocking thread
//! - Fold any failure into an error outcome
//!
//! Execution never fails as a whole; every meta yields an outcome.

use async_trait::async_trait;
use crawlmesh_core::{TaskMeta, TaskOutcome};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::registry::TaskRegistry;
use crate::task::run_stages;

/// Service trait for executing dispatched metas
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn execute(&self, meta: &TaskMeta) -> TaskOutcome;
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    registry: Arc<TaskRegistry>,
}

impl StandardExecutionService {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(&self, meta: &TaskMeta) -> TaskOutcome {
        let key = meta.task_key();

        let mut lease = match self.registry.checkout(&key).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Cannot run {}: {}", meta.id, e);
                return TaskOutcome::Error(e.to_string());
            }
        };

        let owned = meta.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = lease.prepare().and_then(|task| run_stages(task, &owned));
            drop(lease);
            result
        })
        .await;

        match joined {
            Ok(Ok(items)) => {
                debug!("Task {} ({}) produced {} item(s)", meta.id, key, items.len());
                TaskOutcome::Items(items)
            }
            Ok(Err(e)) => {
                warn!("Task {} ({}) failed: {}", meta.id, key, e);
                TaskOutcome::Error(e.to_string())
            }
            Err(e) => {
                warn!("Task {} ({}) aborted: {}", meta.id, key, e);
                TaskOutcome::Error(format!("execution aborted: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskEntry;
    use crate::task::{CrawlTask, TaskError, TaskFactory};
    use serde_json::{Map, Value, json};

    struct UpperTask;

    impl CrawlTask for UpperTask {
        fn request(&mut self, meta: &TaskMeta) -> Result<Value, TaskError> {
            match meta.params.get("word").and_then(Value::as_str) {
                Some(word) => Ok(json!({ "word": word.to_uppercase() })),
                None => Err(TaskError::Request("no word".to_string())),
            }
        }
    }

    struct UpperFactory;

    impl TaskFactory for UpperFactory {
        fn create(&self) -> anyhow::Result<Box<dyn CrawlTask>> {
            Ok(Box::new(UpperTask))
        }
    }

    fn service() -> StandardExecutionService {
        let registry = Arc::new(TaskRegistry::new());
        registry
            .install(
                "t1",
                vec![TaskEntry {
                    task_name: "upper".to_string(),
                    max_threads: 2,
                    factory: Arc::new(UpperFactory),
                }],
            )
            .unwrap();
        StandardExecutionService::new(registry)
    }

    fn meta(task_name: &str, params: Value) -> TaskMeta {
        let params: Map<String, Value> = serde_json::from_value(params).unwrap();
        TaskMeta::new("t1", task_name, params)
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let outcome = service()
            .execute(&meta("upper", json!({"word": "abc"})))
            .await;
        assert_eq!(outcome, TaskOutcome::Items(vec![json!({"word": "ABC"})]));
    }

    #[tokio::test]
    async fn test_stage_failure_becomes_error() {
        let outcome = service().execute(&meta("upper", json!({}))).await;
        assert_eq!(
            outcome,
            TaskOutcome::Error("request failed: no word".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_missing() {
        let outcome = service()
            .execute(&meta("lower", json!({"word": "abc"})))
            .await;
        match outcome {
            TaskOutcome::Error(message) => assert!(message.starts_with("missing task")),
            other => panic!("expected an error, got {:?}", other),
        }
    }
}
