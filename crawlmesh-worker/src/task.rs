//! Task plugin contract
//!
//! Every task type exposes the same stages: `init`, `request`, `parse`,
//! `build` and `stop`. Values travel between stages as JSON. A
//! [`TaskFactory`] creates fresh instances; the registry pools them.

use crawlmesh_core::TaskMeta;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure of one task stage
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("init failed: {0}")]
    Init(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("build failed: {0}")]
    Build(String),

    /// No implementation is loaded for the task
    #[error("missing task: {0}")]
    Missing(String),
}

impl TaskError {
    /// Name of the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            TaskError::Init(_) => "init",
            TaskError::Request(_) => "request",
            TaskError::Parse(_) => "parse",
            TaskError::Build(_) => "build",
            TaskError::Missing(_) => "missing",
        }
    }
}

/// One instance of a task type
///
/// Instances are used by one execution at a time and may keep state between
/// executions (sessions, counters). Stages are blocking.
pub trait CrawlTask: Send {
    /// Called once before the first execution
    fn init(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Fetch the raw payload described by `meta`
    fn request(&mut self, meta: &TaskMeta) -> Result<Value, TaskError>;

    /// Turn the raw payload into one item or a list of items
    fn parse(&mut self, raw: Value) -> Result<Value, TaskError> {
        Ok(default_parse(raw))
    }

    /// Finalize one item, `None` drops it
    fn build(&mut self, item: Value) -> Result<Option<Value>, TaskError> {
        Ok(Some(item))
    }

    /// Called when the instance is discarded
    fn stop(&mut self) {}
}

/// Creates initialized-on-demand instances of one task type
pub trait TaskFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Box<dyn CrawlTask>>;
}

/// Decode a textual payload as JSON, wrapping anything else as `{body = raw}`
///
/// Structured payloads pass through unchanged.
pub fn default_parse(raw: Value) -> Value {
    match raw {
        Value::String(text) => serde_json::from_str(&text).unwrap_or_else(|_| {
            let mut wrapped = Map::new();
            wrapped.insert("body".to_string(), Value::String(text));
            Value::Object(wrapped)
        }),
        other => other,
    }
}

/// Run `request -> parse -> build` for one meta
pub fn run_stages(task: &mut dyn CrawlTask, meta: &TaskMeta) -> Result<Vec<Value>, TaskError> {
    let raw = task.request(meta)?;

    let items = match task.parse(raw)? {
        Value::Array(items) => items,
        item => vec![item],
    };

    let mut built = Vec::with_capacity(items.len());
    for item in items {
        if let Some(item) = task.build(item)? {
            built.push(item);
        }
    }

    Ok(built)
}
