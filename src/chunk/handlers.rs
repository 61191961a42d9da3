use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use super::protocol::{BlockMessage, CONTENT_TYPE_BLOCK, ENDPOINT_BLOCKS};
use super::store::BlockStore;
use crate::error::ClusterError;
use crate::placement::types::BlockId;

/// Routes served by every chunk server.
pub fn router(store: Arc<dyn BlockStore>) -> Router {
    Router::new()
        .route(
            &format!("{}/:id", ENDPOINT_BLOCKS),
            get(handle_get_block).put(handle_put_block),
        )
        .layer(Extension(store))
}

pub async fn handle_put_block(
    Extension(store): Extension<Arc<dyn BlockStore>>,
    Path(block_id): Path<String>,
    body: Bytes,
) -> StatusCode {
    let block = match BlockMessage::decode(&body) {
        Ok(block) => block,
        Err(e) => {
            tracing::error!("Failed to decode block {}: {}", block_id, e);
            return StatusCode::BAD_REQUEST;
        }
    };
    if block.block_id.0 != block_id {
        tracing::error!("Block id mismatch: path {}, body {}", block_id, block.block_id);
        return StatusCode::BAD_REQUEST;
    }

    match store.put_block(block).await {
        Ok(()) => StatusCode::OK,
        Err(e @ ClusterError::ChecksumMismatch { .. }) => {
            tracing::error!("Rejected block {}: {}", block_id, e);
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Err(e) => {
            tracing::error!("Failed to store block {}: {}", block_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_get_block(
    Extension(store): Extension<Arc<dyn BlockStore>>,
    Path(block_id): Path<String>,
) -> Response {
    let block_id = BlockId(block_id);

    let block = match store.get_block(&block_id).await {
        Ok(Some(block)) => block,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read block {}: {}", block_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match block.encode() {
        Ok(bytes) => ([(header::CONTENT_TYPE, CONTENT_TYPE_BLOCK)], bytes).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode block {}: {}", block_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
