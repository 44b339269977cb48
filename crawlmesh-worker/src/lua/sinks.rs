//! Log sink for task scripts
//!
//! Connects the Lua `log` module to `tracing`, tagging each line with the
//! key of the task that emitted it.

use crawlmesh_lua::{LogLevel, LogSink};

/// Sink emitting script log lines as `tracing` events
pub struct TracingLogSink {
    task_key: String,
}

impl TracingLogSink {
    pub fn new(task_key: impl Into<String>) -> Self {
        Self {
            task_key: task_key.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        let task = self.task_key.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(task, "{}", message),
            LogLevel::Info => tracing::info!(task, "{}", message),
            LogLevel::Warning => tracing::warn!(task, "{}", message),
            LogLevel::Error => tracing::error!(task, "{}", message),
        }
    }
}
