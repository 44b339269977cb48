//! Crawlmesh Lua Infrastructure
//!
//! This crate provides the Lua side of crawl tasks.
//! It includes:
//! - Module trait and registry for host modules
//! - The restricted sandbox every task VM starts from
//! - Core host modules (log, json)
//! - Task definition parsing, both metadata-only and executable

pub mod definition;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use definition::{TaskDefinition, parse_task_definitions};
pub use module::{CrawlModule, ModuleRegistry};
pub use modules::{JsonModule, LogLevel, LogModule, LogSink};
pub use parser::{TaskMetadata, parse_task_metadata};
pub use sandbox::{create_execution_sandbox, create_sandbox};
