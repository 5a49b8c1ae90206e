//! File routes
//!
//! Lists and deletes finished objects, and streams them back for the
//! backends that have no public URL of their own.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::naming;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub success: bool,
    pub message: String,
}

/// Create the `/api/files` router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_files))
        .route("/*object_name", axum::routing::delete(delete_file))
}

/// Create the `/files` download router
pub fn download_router() -> Router<AppState> {
    Router::new().route("/*object_name", get(download_file))
}

/// GET /api/files
async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>> {
    let files = state
        .uploads()
        .catalog()
        .list()
        .map_ok(|obj| FileEntry {
            url: state.download_url(&obj.key),
            name: obj.key,
            size: obj.size,
            last_modified: obj.last_modified,
        })
        .try_collect::<Vec<_>>()
        .await?;

    Ok(Json(FileListResponse { files }))
}

/// DELETE /api/files/*object_name
async fn delete_file(
    State(state): State<AppState>,
    Path(object_name): Path<String>,
) -> Result<Json<DeleteFileResponse>> {
    state.uploads().catalog().delete(&object_name).await?;

    Ok(Json(DeleteFileResponse {
        success: true,
        message: format!("Deleted {}", object_name),
    }))
}

/// GET /files/*object_name
async fn download_file(
    State(state): State<AppState>,
    Path(object_name): Path<String>,
) -> Result<Response> {
    let stream = state.uploads().catalog().open(&object_name).await?;

    let filename = object_name.rsplit('/').next().unwrap_or(&object_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, naming::content_type_for(&object_name))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename*=UTF-8''{}", urlencoding::encode(filename)),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::validation(format!("invalid object name: {}", e)))
}
