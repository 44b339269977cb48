//! API Error Handling
//!
//! Transport-level failures of the RPC surface. Admission outcomes are not
//! errors: handlers return them as reply codes with HTTP 200.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crawlmesh_core::RpcReply;

use crate::service::bundle_service::BundleStoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(RpcReply::error(message))).into_response()
    }
}

impl From<BundleStoreError> for ApiError {
    fn from(err: BundleStoreError) -> Self {
        match err {
            BundleStoreError::Io(_) => ApiError::InternalError(err.to_string()),
            BundleStoreError::InvalidClientId(_)
            | BundleStoreError::ClientMismatch { .. }
            | BundleStoreError::Upload(_)
            | BundleStoreError::Bundle(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
