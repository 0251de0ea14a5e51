//! Request and response shapes of the conversion service.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::options::ConvertOptionsRequest;
use crate::storage::RESULT_EXTENSION;
use crate::task::{Task, TaskStatus, UploadedFile};

/// A registered upload as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileView {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub duration: f64,
}

impl From<&UploadedFile> for UploadedFileView {
    fn from(file: &UploadedFile) -> Self {
        Self {
            file_id: file.id.clone(),
            name: file.name.clone(),
            size: file.size_bytes,
            duration: file.duration_secs,
        }
    }
}

/// Body of a convert request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub options: ConvertOptionsRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub task_ids: Vec<String>,
}

/// Body of the batch status and batch download requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    #[serde(default)]
    pub task_ids: Vec<String>,
}

pub type BatchDownloadRequest = BatchStatusRequest;

/// Public projection of a task.
///
/// `resultUrl` appears only on SUCCESS; `errorCode` and `errorMessage` only
/// on FAILED. A RUNNING task between retries still carries its last error
/// internally but does not expose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        let (result_url, error_code, error_message) = match task.status {
            TaskStatus::Success => (task.result_url.clone(), None, None),
            TaskStatus::Failed => (None, task.error_code, task.error_message.clone()),
            TaskStatus::Pending | TaskStatus::Running => (None, None, None),
        };
        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            result_url,
            error_code,
            error_message,
        }
    }
}

/// Where a finished result lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultLocation {
    pub task_id: String,
    pub key: String,
    pub url: String,
    /// Name offered to clients, derived from the upload's name.
    pub file_name: String,
}

/// `clip.mp4` becomes `clip_transparent.webm`.
pub fn result_file_name(upload_name: &str) -> String {
    let base = match upload_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => upload_name,
    };
    format!("{}_transparent.{}", base, RESULT_EXTENSION)
}
