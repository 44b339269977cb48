//! Host modules for task scripts
//!
//! Each module is generic enough to be shared by every component that builds
//! a task VM. Modules that reach outside the sandbox (HTTP) live in the worker.

pub mod json;
pub mod log;

pub use json::JsonModule;
pub use log::{LogLevel, LogModule, LogSink};
