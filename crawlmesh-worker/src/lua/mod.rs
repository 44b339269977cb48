//! Lua execution infrastructure for the worker
//!
//! This module provides:
//! - The `http` host module, backed by the worker's HTTP client
//! - A log sink forwarding script logs to `tracing`
//! - Lua task instances and their factory

pub mod modules;
pub mod sinks;
pub mod task;

use crawlmesh_lua::{JsonModule, LogModule, ModuleRegistry};

use crate::lua::modules::HttpModule;
use crate::lua::sinks::TracingLogSink;

/// Host modules available to the scripts of `task_key`
pub fn task_modules(task_key: &str, http: &HttpModule) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register(LogModule::new(TracingLogSink::new(task_key)));
    registry.register(JsonModule);
    registry.register(http.clone());
    registry
}
