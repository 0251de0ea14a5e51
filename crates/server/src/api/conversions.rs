//! Upload, convert, status and download handlers.

use axum::{
    extract::{
        multipart::Field,
        rejection::{JsonRejection, QueryRejection},
        Multipart, Query, State,
    },
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zip::{result::ZipResult, write::SimpleFileOptions, CompressionMethod, ZipWriter};

use alphavid_core::metrics::REQUESTS_REJECTED;
use alphavid_core::service::{
    BatchDownloadRequest, BatchStatusRequest, ConvertRequest, ConvertResponse, ResultLocation,
    TaskStatusView, UploadedFileView,
};
use alphavid_core::ErrorCode;

use super::error::ApiError;
use crate::state::AppState;

/// Multipart field carrying the uploaded videos.
pub const UPLOAD_FIELD: &str = "files";

/// File name of batch download archives.
pub const ARCHIVE_NAME: &str = "transparent_videos.zip";

/// Query parameters addressing one task.
#[derive(Debug, Deserialize)]
pub struct TaskIdParams {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
}

impl TaskIdParams {
    fn require(self) -> Result<String, ApiError> {
        match self.task_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ApiError::invalid_request("missing query parameter 'taskId'")),
        }
    }
}

/// Receive one or more videos and register them for conversion.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedFileView>>, ApiError> {
    let limits = state.service().limits().clone();
    let mut uploaded = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "Skipping unknown multipart field");
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::invalid_request("file part is missing a file name"))?;

        if uploaded.len() >= limits.max_files_per_batch {
            return Err(reject(ApiError::new(
                ErrorCode::LimitExceededCount,
                format!(
                    "at most {} files per upload",
                    limits.max_files_per_batch
                ),
            )));
        }
        if let Err(violation) = limits.check_file(&name, 0, 0.0) {
            return Err(reject(ApiError::new(violation.code, violation.message)));
        }

        let received = receive(&mut field, &name, limits.max_file_size_bytes()).await?;
        let file = state.service().ingest(&name, received.path()).await?;
        uploaded.push(UploadedFileView::from(&file));
    }

    if uploaded.is_empty() {
        return Err(ApiError::invalid_request(format!(
            "no files in multipart field '{}'",
            UPLOAD_FIELD
        )));
    }

    info!(count = uploaded.len(), "Upload accepted");
    Ok(Json(uploaded))
}

/// Streams one multipart field into a temporary file, enforcing the size limit.
async fn receive(
    field: &mut Field<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<NamedTempFile, ApiError> {
    let temp = tempfile::Builder::new()
        .prefix("alphavid-upload-")
        .tempfile()
        .map_err(internal)?;
    let mut out = tokio::fs::File::from_std(temp.as_file().try_clone().map_err(internal)?);

    let mut received: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        received += chunk.len() as u64;
        if received > max_bytes {
            return Err(reject(ApiError::new(
                ErrorCode::LimitExceededSize,
                format!(
                    "{}: exceeds the {} MB limit",
                    name,
                    max_bytes / (1024 * 1024)
                ),
            )));
        }
        out.write_all(&chunk).await.map_err(internal)?;
    }
    out.flush().await.map_err(internal)?;

    Ok(temp)
}

/// Create one conversion task per file.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state
        .service()
        .convert(&request.files, &request.options)
        .await?;
    Ok(Json(response))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TaskIdParams>, QueryRejection>,
) -> Result<Json<TaskStatusView>, ApiError> {
    let Query(params) = params?;
    let task_id = params.require()?;
    Ok(Json(state.service().status(&task_id)?))
}

/// Status of several tasks. Unknown IDs are left out of the response.
pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchStatusRequest>, JsonRejection>,
) -> Result<Json<Vec<TaskStatusView>>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.service().batch_status(&request.task_ids)?))
}

/// Stream the converted WebM of a finished task.
pub async fn download(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TaskIdParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let task_id = params.require()?;
    let (location, bytes) = state.service().read_result(&task_id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "video/webm".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&location.file_name)),
        ],
        bytes,
    ))
}

/// Bundle the results of several finished tasks into one ZIP.
///
/// Unknown and unfinished tasks are left out; 404 when none is finished.
pub async fn batch_download(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchDownloadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let results = state.service().read_results(&request.task_ids).await?;
    let files = results.len();

    let archive = tokio::task::spawn_blocking(move || build_archive(results))
        .await
        .map_err(|e| ApiError::new(ErrorCode::InternalError, format!("archive task failed: {}", e)))?
        .map_err(|e| {
            ApiError::new(
                ErrorCode::InternalError,
                format!("could not build archive: {}", e),
            )
        })?;

    info!(files, bytes = archive.len(), "Batch download archived");
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, attachment(ARCHIVE_NAME)),
        ],
        archive,
    ))
}

fn build_archive(results: Vec<(ResultLocation, Vec<u8>)>) -> ZipResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (location, bytes) in results {
        // Entries stay at the archive root.
        let entry = location.file_name.replace(['/', '\\'], "_");
        writer.start_file(entry, options)?;
        writer.write_all(&bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// `Content-Disposition` for a download, with the name reduced to
/// characters that are safe in a quoted header value.
fn attachment(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

fn reject(error: ApiError) -> ApiError {
    REQUESTS_REJECTED
        .with_label_values(&[error.code.as_str()])
        .inc();
    error
}

fn internal(e: std::io::Error) -> ApiError {
    ApiError::new(ErrorCode::InternalError, format!("upload failed: {}", e))
}
