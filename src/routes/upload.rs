//! Upload Routes
//!
//! HTTP endpoints for resumable chunked uploads.
//!
//! Endpoints:
//! - POST /api/upload/init - Start an upload, returns uploadId and objectName
//! - POST /api/upload/chunk - Store one chunk (multipart: uploadId, chunkIndex, chunk)
//! - POST /api/upload/complete - Merge all chunks into the final object
//! - DELETE /api/upload/:upload_id - Cancel an upload
//! - GET /api/upload/:upload_id/status - Upload progress
//! - POST /api/upload/single - One-shot upload (multipart: file)

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::{
    parse_chunk_index, CancelUploadResponse, ChunkUploadResponse, CompleteUploadRequest,
    CompleteUploadResponse, InitUploadRequest, InitUploadResponse, SessionRegistry,
    SingleUploadResponse, UploadStatusResponse,
};

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init_upload))
        .route("/chunk", post(upload_chunk))
        .route("/complete", post(complete_upload))
        .route("/single", post(upload_single))
        .route("/:upload_id", delete(cancel_upload))
        .route("/:upload_id/status", get(upload_status))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/upload/init
async fn init_upload(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InitUploadRequest>, JsonRejection>,
) -> Result<Json<InitUploadResponse>> {
    let Json(request) = payload.map_err(bad_json)?;
    let session = state.uploads().init(request).await?;

    Ok(Json(InitUploadResponse {
        upload_id: session.id,
        object_name: session.object_name.clone(),
        total_chunks: session.total_chunks,
    }))
}

/// Fields of a chunk upload form
#[derive(Default)]
struct ChunkForm {
    upload_id: Option<String>,
    chunk_index: Option<String>,
    chunk: Option<Bytes>,
}

/// POST /api/upload/chunk
///
/// Rejects missing `uploadId`/`chunkIndex` before looking the session up,
/// and an unknown session before complaining about a missing `chunk`.
async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>> {
    let mut form = ChunkForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "uploadId" => form.upload_id = Some(field.text().await.map_err(bad_multipart)?),
            "chunkIndex" => form.chunk_index = Some(field.text().await.map_err(bad_multipart)?),
            "chunk" => form.chunk = Some(field.bytes().await.map_err(bad_multipart)?),
            other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let (Some(upload_id), Some(chunk_index)) = (form.upload_id, form.chunk_index) else {
        return Err(AppError::validation(
            "missing required parameters: uploadId, chunkIndex",
        ));
    };
    let chunk_index = parse_chunk_index(&chunk_index)?;
    let upload_id = SessionRegistry::parse_id(&upload_id)?;

    state.uploads().registry().get(upload_id).await?;

    let chunk = form
        .chunk
        .ok_or_else(|| AppError::validation("missing chunk file"))?;

    let receipt = state
        .uploads()
        .upload_chunk(upload_id, chunk_index, chunk)
        .await?;

    Ok(Json(receipt.into()))
}

/// POST /api/upload/complete
async fn complete_upload(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> Result<Json<CompleteUploadResponse>> {
    let Json(request) = payload.map_err(bad_json)?;

    let upload_id = request
        .upload_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::validation("missing required parameter: uploadId"))?;
    let upload_id = SessionRegistry::parse_id(&upload_id)?;

    let done = state.uploads().complete(upload_id).await?;

    Ok(Json(CompleteUploadResponse {
        success: true,
        download_url: state.download_url(&done.object_name),
        file_name: done.file_name,
        object_name: done.object_name,
        size: done.size,
    }))
}

/// DELETE /api/upload/:upload_id
async fn cancel_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<CancelUploadResponse>> {
    let upload_id = SessionRegistry::parse_id(&upload_id)?;
    state.uploads().cancel(upload_id).await?;

    Ok(Json(CancelUploadResponse {
        success: true,
        message: "Upload cancelled".to_string(),
    }))
}

/// GET /api/upload/:upload_id/status
async fn upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadStatusResponse>> {
    let upload_id = SessionRegistry::parse_id(&upload_id)?;
    Ok(Json(state.uploads().status(upload_id).await?))
}

/// POST /api/upload/single
async fn upload_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SingleUploadResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::validation("file field has no file name"))?;
        let data = field.bytes().await.map_err(bad_multipart)?;

        let stored = state.uploads().upload_single(&file_name, data).await?;

        return Ok(Json(SingleUploadResponse {
            success: true,
            download_url: state.download_url(&stored.object_name),
            file_name: stored.file_name,
            object_name: stored.object_name,
            size: stored.size,
        }));
    }

    tracing::warn!("No file field found in single upload");
    Err(AppError::validation("no file uploaded"))
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::validation(format!("invalid request body: {}", rejection.body_text()))
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::validation(format!("invalid multipart body: {}", err.body_text()))
}
