//! Bundle API Handlers
//!
//! Streamed upload (`PushBundle`) and download (`PullBundle`) of client
//! code bundles.

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use crawlmesh_core::dto::rpc::{PullBundleRequest, PushBundleQuery};
use crawlmesh_core::{ResultCode, RpcReply, chunk_size};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::bundle_service::validate_client_id;

/// POST /rpc/PushBundle?client_id=<id>
/// Store a client's bundle and (re)register its session
pub async fn push_bundle(
    State(state): State<AppState>,
    Query(query): Query<PushBundleQuery>,
    body: Body,
) -> ApiResult<Json<RpcReply>> {
    let client_id = query.client_id;
    tracing::info!("Receiving bundle for client: {}", client_id);

    validate_client_id(&client_id)?;

    if !state.routes.has_slot_for(&client_id) {
        tracing::warn!("Rejecting bundle for {}: no free client slot", client_id);
        return Ok(Json(
            RpcReply::new(ResultCode::ClientIsFull).with_message("no free client slot"),
        ));
    }

    let lock = state.bundles.client_lock(&client_id);
    let _guard = lock.lock().await;

    let manifest = match state
        .bundles
        .store(&client_id, body.into_data_stream())
        .await
    {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!("Bundle upload for {} failed: {}", client_id, e);
            return Err(e.into());
        }
    };
    let task_count = manifest.tasks.len();

    match state.routes.add_client(manifest) {
        Ok(version) => {
            tracing::info!(
                "Client {} pushed bundle version {} with {} task(s)",
                client_id,
                version,
                task_count
            );
            Ok(Json(RpcReply::success().with_data(version.into())))
        }
        Err(admission) => {
            tracing::warn!("Rejecting bundle for {}: {}", client_id, admission);
            state.bundles.remove(&client_id).await?;
            Ok(Json(
                RpcReply::new(admission.code()).with_message(admission.to_string()),
            ))
        }
    }
}

/// POST /rpc/PullBundle
/// Stream a client's current bundle to a worker
///
/// The worker is marked synchronized once the whole archive has been
/// streamed, and only if no newer bundle was pushed meanwhile.
pub async fn pull_bundle(
    State(state): State<AppState>,
    Json(req): Json<PullBundleRequest>,
) -> ApiResult<Response> {
    tracing::debug!(
        "Worker {} pulling bundle of {}",
        req.worker_id,
        req.client_id
    );

    validate_client_id(&req.client_id)?;

    // Read the version before opening the archive: the file is never older
    let version = state
        .routes
        .version_of(&req.client_id)
        .ok_or_else(|| ApiError::NotFound(format!("Client {} not found", req.client_id)))?;

    let path = state.bundles.archive_path(&req.client_id);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound(format!("Bundle of {} not found", req.client_id)))?;
    let total = file
        .metadata()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?
        .len();

    let routes = state.routes.clone();
    let PullBundleRequest {
        client_id,
        worker_id,
    } = req;

    let stream = async_stream::stream! {
        let mut reader = ReaderStream::with_capacity(file, chunk_size(total));
        let mut complete = true;

        while let Some(chunk) = reader.next().await {
            if let Err(e) = &chunk {
                tracing::warn!("Failed to read bundle of {}: {}", client_id, e);
                complete = false;
            }
            yield chunk;
            if !complete {
                break;
            }
        }

        if complete {
            if routes.mark_synced(&worker_id, &client_id, version) {
                tracing::info!("Worker {} synced {} (version {})", worker_id, client_id, version);
            } else {
                tracing::debug!(
                    "Worker {} pulled stale version {} of {}",
                    worker_id,
                    version,
                    client_id
                );
            }
        }
    };

    Ok(([(CONTENT_TYPE, "application/zip")], Body::from_stream(stream)).into_response())
}
