//! Crawlmesh Core
//!
//! Core types and abstractions shared by every crawlmesh service.
//!
//! This crate contains:
//! - Domain types: task metas, task results and bundle manifests
//! - DTOs: request/response shapes of the coordinator RPC surface
//! - Task identity, retry and transfer helpers used on both sides of the wire
//! - Bundle archive packing and unpacking

pub mod archive;
pub mod domain;
pub mod dto;
pub mod identity;
pub mod retry;
pub mod transfer;

pub use archive::{BundleError, pack_dir, unpack_archive};
pub use domain::bundle::{BundleManifest, MANIFEST_FILE, TaskSpec};
pub use domain::meta::TaskMeta;
pub use domain::result::{TaskOutcome, TaskResult};
pub use dto::rpc::{Dispatch, ResultCode, RpcReply};
pub use identity::task_id;
pub use retry::{RetryPolicy, retry};
pub use transfer::chunk_size;
