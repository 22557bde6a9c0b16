use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::{error, info, instrument};

use crate::app::AppState;
use crate::errors::ApiError;
use crate::storage::{MAX_PAGE_SIZE, StoredFile};
use crate::upload;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub url: String,
    pub public_id: String,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub files: Vec<StoredFile>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// `POST /api/upload`
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::InvalidUpload(e.body_text()))?;
    let file_data = upload::read_single_file(&mut multipart, &state.constraints).await?;

    let stored = state.storage.store(file_data).await?;
    info!(public_id = %stored.public_id, name = %stored.original_name, "file stored");

    Ok(Json(UploadResponse {
        success: true,
        filename: stored.original_name,
        url: stored.url,
        public_id: stored.public_id,
    }))
}

/// `GET /api/files`
pub async fn list_files(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<FileList>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = params.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);

    let files = state.storage.list(limit).await?;
    Ok(Json(FileList { files }))
}

/// `DELETE /api/delete/{public_id}`
#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if !state.storage.delete(&public_id).await? {
        return Err(ApiError::NotFound);
    }

    info!("file deleted");
    Ok(Json(DeleteResponse { success: true }))
}

pub async fn route_not_found() -> ApiError {
    ApiError::RouteNotFound
}

/// Last line of defence: anything that panicked below becomes a generic 500.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "request handler panicked");

    ApiError::Internal.into_response()
}
