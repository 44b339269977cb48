//! Health and Stats API Handlers
//!
//! Endpoints for monitoring.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use crawlmesh_core::dto::stats::CoordinatorStats;

use crate::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /stats
/// Snapshot of clients, workers and queue depth
pub async fn stats(State(state): State<AppState>) -> Json<CoordinatorStats> {
    Json(state.routes.snapshot())
}
