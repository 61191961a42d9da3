use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use super::coordinator::Master;
use super::protocol::*;
use crate::error::ClusterError;
use crate::membership::types::Node;
use crate::placement::types::{File, FileId};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(err: &ClusterError) -> StatusCode {
    match err {
        ClusterError::EmptyAddress => StatusCode::BAD_REQUEST,
        ClusterError::UnknownNode(_)
        | ClusterError::UnknownBlock(_)
        | ClusterError::UnknownFile(_) => StatusCode::NOT_FOUND,
        ClusterError::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ClusterError::InsufficientCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::PlacementFailed { .. }
        | ClusterError::NoLiveSource(_)
        | ClusterError::Transport(_) => StatusCode::BAD_GATEWAY,
        ClusterError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: ClusterError) -> ApiError {
    (status_for(&err), Json(ErrorResponse::from_error(&err)))
}

/// Routes served by the master process.
pub fn router(master: Arc<Master>) -> Router {
    Router::new()
        .route(ENDPOINT_REGISTER, post(handle_register))
        .route(ENDPOINT_HEARTBEAT, post(handle_heartbeat))
        .route(ENDPOINT_SYNC_DONE, post(handle_sync_done))
        .route(ENDPOINT_UPLOAD, post(handle_upload))
        .route(ENDPOINT_FILES, get(handle_list_files))
        .route(&format!("{}/:id", ENDPOINT_FILES), get(handle_get_file))
        .route(ENDPOINT_NODES, get(handle_list_nodes))
        .layer(Extension(master))
}

pub async fn handle_register(
    Extension(master): Extension<Arc<Master>>,
    Json(req): Json<RegistrationMessage>,
) -> Result<Json<RegisterResponse>, ApiError> {
    match master.register(req) {
        Ok(node_id) => Ok(Json(RegisterResponse { node_id })),
        Err(e) => {
            tracing::warn!("Rejected registration: {}", e);
            Err(api_error(e))
        }
    }
}

pub async fn handle_heartbeat(
    Extension(master): Extension<Arc<Master>>,
    Json(req): Json<HeartbeatMessage>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let node_id = req.node_id;
    match master.heartbeat(req).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            tracing::warn!("Heartbeat from {} rejected: {}", node_id, e);
            Err(api_error(e))
        }
    }
}

pub async fn handle_sync_done(
    Extension(master): Extension<Arc<Master>>,
    Json(req): Json<SyncDoneMessage>,
) -> Result<Json<SyncDoneResponse>, ApiError> {
    master.sync_done(req).await.map(Json).map_err(|e| {
        tracing::warn!("Sync acknowledgement rejected: {}", e);
        api_error(e)
    })
}

pub async fn handle_upload(
    Extension(master): Extension<Arc<Master>>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<File>, ApiError> {
    match master.upload(&query.name, body.to_vec()).await {
        Ok(file) => Ok(Json(file)),
        Err(e) => {
            tracing::error!("Upload of {} failed: {}", query.name, e);
            Err(api_error(e))
        }
    }
}

pub async fn handle_list_files(Extension(master): Extension<Arc<Master>>) -> Json<Vec<File>> {
    Json(master.list_files())
}

pub async fn handle_get_file(
    Extension(master): Extension<Arc<Master>>,
    Path(file_id): Path<String>,
) -> Result<Json<File>, ApiError> {
    let file_id = FileId(file_id);
    master
        .get_file(&file_id)
        .map(Json)
        .ok_or_else(|| api_error(ClusterError::UnknownFile(file_id)))
}

pub async fn handle_list_nodes(Extension(master): Extension<Arc<Master>>) -> Json<Vec<Node>> {
    Json(master.list_nodes())
}
