//! Task storage trait and errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{NewUploadedFile, PurgeReport, Task, TaskMutation, TaskStatus, UploadedFile};
use crate::error::ErrorCode;
use crate::filter::FilterChain;
use crate::options::ConvertOptions;

/// Error type for task store operations.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    /// Task not found (or past retention).
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Uploaded file not found (or past retention).
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File {file_id} already has an active task: {task_id}")]
    ActiveTaskExists { file_id: String, task_id: String },

    #[error("Cannot {operation} task {task_id}: current status is {status}")]
    InvalidTransition {
        task_id: String,
        status: TaskStatus,
        operation: &'static str,
    },

    /// The lease belongs to another holder.
    #[error("Task {task_id} is leased by another worker")]
    LeaseHeld { task_id: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl TaskStoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::FileNotFound(_) => ErrorCode::NotFound,
            Self::ActiveTaskExists { .. } => ErrorCode::InvalidRequest,
            Self::InvalidTransition { .. } | Self::LeaseHeld { .. } => ErrorCode::InternalError,
            Self::Database(_) => ErrorCode::StorageError,
        }
    }
}

/// Durable task and upload records, shared by the request side and workers.
///
/// Every method is atomic: callers never observe a partially applied change.
pub trait TaskStore: Send + Sync {
    /// Register an upload.
    fn register_file(&self, file: NewUploadedFile) -> Result<UploadedFile, TaskStoreError>;

    /// Get an upload by ID. Expired uploads are reported as absent.
    fn get_file(&self, file_id: &str) -> Result<Option<UploadedFile>, TaskStoreError>;

    /// Create a PENDING task for a file.
    ///
    /// Fails with `FileNotFound` for unknown or expired files and with
    /// `ActiveTaskExists` while the file has a non-terminal task.
    fn create(
        &self,
        file_id: &str,
        options: &ConvertOptions,
        filter_chain: &FilterChain,
    ) -> Result<Task, TaskStoreError>;

    /// Creates one task per file, all or nothing.
    fn create_batch(
        &self,
        file_ids: &[String],
        options: &ConvertOptions,
        filter_chain: &FilterChain,
    ) -> Result<Vec<Task>, TaskStoreError>;

    /// Get a task by ID; `NotFound` when absent or expired.
    fn get(&self, task_id: &str) -> Result<Task, TaskStoreError>;

    /// Apply a mutation atomically and return the updated task.
    fn update(&self, task_id: &str, mutation: TaskMutation) -> Result<Task, TaskStoreError>;

    /// Get several tasks, in request order. Unknown IDs are skipped.
    fn list(&self, task_ids: &[String]) -> Result<Vec<Task>, TaskStoreError>;

    /// Tasks in `status`, oldest first.
    fn list_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>, TaskStoreError>;

    /// RUNNING tasks whose lease deadline is at or before `now`.
    fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, TaskStoreError>;

    /// Delete uploads registered before `cutoff` together with their tasks.
    fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport, TaskStoreError>;
}
