use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file received")]
    MissingFile,
    #[error("File exceeds the {max} byte limit")]
    TooLarge { max: usize },
    #[error("File type not allowed: {0}")]
    DisallowedType(String),
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("File not found")]
    NotFound,
    #[error("Route not found")]
    RouteNotFound,
    #[error("{0}")]
    Backend(#[from] StorageError),
    #[error("Server error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::TooLarge { .. }
            | ApiError::DisallowedType(_)
            | ApiError::InvalidUpload(_)
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound | ApiError::RouteNotFound => StatusCode::NOT_FOUND,
            ApiError::Backend(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Backend(e) => tracing::error!(error = ?e, "storage backend failure"),
            ApiError::Internal => tracing::error!("internal server error"),
            _ => tracing::debug!("client error: {}", self),
        }

        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
