//! Module implementations for the worker
//!
//! Modules here reach outside the sandbox and need the worker's runtime.
//! Pure modules (log, json) come from `crawlmesh-lua`.

pub mod http;

pub use http::HttpModule;
