//! Task API Handlers
//!
//! Meta submission and dispatch, result reporting and retrieval, and client
//! teardown.

use axum::{Json, extract::State};
use crawlmesh_core::dto::rpc::{ClientRequest, WorkerRequest};
use crawlmesh_core::{Dispatch, ResultCode, RpcReply, TaskMeta, TaskResult};

use crate::AppState;
use crate::api::error::{ApiError, ApiResult};

// =============================================================================
// Crawler Side
// =============================================================================

/// POST /rpc/AddMeta
/// Queue a meta for its client
pub async fn add_meta(State(state): State<AppState>, Json(meta): Json<TaskMeta>) -> Json<RpcReply> {
    tracing::debug!("Adding meta {} for {}", meta.id, meta.client_id);

    let client_id = meta.client_id.clone();
    match state.routes.add_meta(meta) {
        Ok(()) => Json(RpcReply::success()),
        Err(admission) => {
            tracing::warn!("Meta for {} rejected: {}", client_id, admission);
            Json(RpcReply::new(admission.code()).with_message(format!("{}: {}", client_id, admission)))
        }
    }
}

/// POST /rpc/GetResult
/// Pop the oldest unread result of a client
pub async fn get_result(
    State(state): State<AppState>,
    Json(req): Json<ClientRequest>,
) -> ApiResult<Json<RpcReply>> {
    if !state.routes.client_is_exist(&req.client_id) {
        return Ok(Json(
            RpcReply::new(ResultCode::ClientNotFound).with_message(req.client_id),
        ));
    }

    match state.routes.get_result(&req.client_id) {
        Some(result) => {
            let data = serde_json::to_value(&result)
                .map_err(|e| ApiError::InternalError(format!("Failed to encode result: {}", e)))?;
            Ok(Json(RpcReply::success().with_data(data)))
        }
        None => Ok(Json(RpcReply::new(ResultCode::ClientResultEmpty))),
    }
}

/// POST /rpc/DelClient
/// Tear down a client session and its stored bundle
pub async fn del_client(
    State(state): State<AppState>,
    Json(req): Json<ClientRequest>,
) -> ApiResult<Json<RpcReply>> {
    tracing::info!("Deleting client: {}", req.client_id);

    let lock = state.bundles.client_lock(&req.client_id);
    let _guard = lock.lock().await;

    if !state.routes.remove(&req.client_id) {
        tracing::debug!("Client {} was not registered", req.client_id);
    }
    state.bundles.remove(&req.client_id).await?;

    Ok(Json(RpcReply::success()))
}

// =============================================================================
// Worker Side
// =============================================================================

/// POST /rpc/GetMeta
/// Tell a worker what to do next
pub async fn get_meta(
    State(state): State<AppState>,
    Json(req): Json<WorkerRequest>,
) -> ApiResult<Json<RpcReply>> {
    let reply = match state.routes.dispatch(&req.worker_id) {
        Dispatch::Task(meta) => {
            tracing::debug!("Dispatching {} to worker {}", meta.id, req.worker_id);
            let data = serde_json::to_value(&meta)
                .map_err(|e| ApiError::InternalError(format!("Failed to encode meta: {}", e)))?;
            RpcReply::success().with_data(data)
        }
        Dispatch::Empty => RpcReply::new(ResultCode::TaskQueueEmpty),
        Dispatch::NotUpdated(clients) => {
            tracing::debug!("Worker {} must pull {:?}", req.worker_id, clients);
            RpcReply::new(ResultCode::WorkerNotUpdate)
                .with_message(clients.join(","))
                .with_data(clients.into())
        }
        Dispatch::Closed(client_id) => {
            tracing::debug!("Notifying worker {} that {} closed", req.worker_id, client_id);
            RpcReply::new(ResultCode::ClientIsClosed).with_message(client_id)
        }
    };

    Ok(Json(reply))
}

/// POST /rpc/OnResult
/// Store a worker's result in its client's mailbox
pub async fn on_result(State(state): State<AppState>, Json(result): Json<TaskResult>) -> Json<RpcReply> {
    tracing::debug!(
        "Result {} from worker {} (status: {})",
        result.task_id,
        result.worker_id,
        result.status
    );

    let client_id = result.client_id.clone();
    if !state.routes.update(result) {
        tracing::debug!("Dropped result for closed client {}", client_id);
    }

    Json(RpcReply::success())
}
