use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::BytesRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use ck_types::api::UploadResponse;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::SessionUser;

/// 10 MB upload limit
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Client-side file name; only its extension is kept.
    #[serde(default)]
    pub name: String,
}

/// POST /api/uploads?name=photo.png: raw bytes in, public path out.
pub async fn upload(
    State(state): State<AppState>,
    user: SessionUser,
    Query(query): Query<UploadQuery>,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // The route's body limit rejects oversized bodies before they reach us.
    let bytes = body.map_err(|rej| {
        if rej.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::Validation(rej.body_text())
        }
    })?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("empty upload".into()));
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let blob = state.storage.put(&query.name, &bytes).await?;
    info!("{} uploaded {} ({} bytes)", user.username, blob.path, blob.size);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            path: blob.path,
            size: blob.size,
        }),
    ))
}
