//! Error types for the chunked upload server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type for blob store operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload incomplete: {uploaded} of {total} chunks received")]
    Conflict { uploaded: usize, total: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn upload_not_found(upload_id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("upload session {}", upload_id))
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_chunks: Option<u32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut uploaded_chunks = None;
        let mut total_chunks = None;

        let (status, error_type, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict { uploaded, total } => {
                uploaded_chunks = Some(*uploaded);
                total_chunks = Some(*total);
                (StatusCode::BAD_REQUEST, "incomplete_upload", self.to_string())
            }
            AppError::Task(e) => {
                tracing::error!("Background task failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal error".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                // A missing object here is a lost part or a store fault;
                // lookups of finished objects report `NotFound` themselves.
                match e {
                    StorageError::InvalidKey(key) => (
                        StatusCode::BAD_REQUEST,
                        "validation_error",
                        format!("Invalid object key: {}", key),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "Storage error".to_string(),
                    ),
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type,
            message,
            uploaded_chunks,
            total_chunks,
        });

        (status, body).into_response()
    }
}
