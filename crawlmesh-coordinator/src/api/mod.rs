//! API Module
//!
//! HTTP RPC layer for the coordinator.
//! Each submodule handles endpoints for a specific concern.

pub mod bundle;
pub mod error;
pub mod health;
pub mod task;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_bundle_bytes = state.max_bundle_bytes;

    Router::new()
        // Monitoring
        .route("/health", get(health::health_check))
        .route("/stats", get(health::stats))
        // Bundle transfer
        .route(
            "/rpc/PushBundle",
            post(bundle::push_bundle).layer(RequestBodyLimitLayer::new(max_bundle_bytes)),
        )
        .route("/rpc/PullBundle", post(bundle::pull_bundle))
        // Tasks and results
        .route("/rpc/AddMeta", post(task::add_meta))
        .route("/rpc/GetMeta", post(task::get_meta))
        .route("/rpc/OnResult", post(task::on_result))
        .route("/rpc/GetResult", post(task::get_result))
        .route("/rpc/DelClient", post(task::del_client))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
