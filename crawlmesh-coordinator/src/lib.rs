//! Crawlmesh Coordinator
//!
//! Central RPC service: stores client bundles, queues task metas, hands them
//! to workers and keeps each client's result mailbox.

pub mod api;
pub mod config;
pub mod service;

use std::sync::Arc;

use crate::config::Config;
use crate::service::bundle_service::BundleStore;
use crate::service::route_service::RouteTable;

pub use api::create_router;

/// Shared state of every request handler
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub bundles: Arc<BundleStore>,
    pub max_bundle_bytes: usize,
}

impl AppState {
    /// Build the route table and open the bundle store described by `config`
    pub fn new(config: &Config) -> std::io::Result<Self> {
        Ok(Self {
            routes: Arc::new(RouteTable::new(
                config.max_clients,
                config.max_pending_tasks,
            )),
            bundles: Arc::new(BundleStore::open(&config.container_dir)?),
            max_bundle_bytes: config.max_bundle_bytes,
        })
    }
}
