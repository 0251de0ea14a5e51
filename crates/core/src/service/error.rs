//! Error types for the conversion service.

use thiserror::Error;

use crate::config::LimitViolation;
use crate::converter::ConverterError;
use crate::error::ErrorCode;
use crate::options::ValidationError;
use crate::queue::QueueError;
use crate::storage::StorageError;
use crate::task::{TaskStatus, TaskStoreError};

/// Errors returned to callers of [`ConversionService`](super::ConversionService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] ValidationError),

    #[error("Too many files: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error(transparent)]
    Limit(#[from] LimitViolation),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The task exists but has no downloadable result.
    #[error("Task {task_id} has no result (status {status})")]
    ResultNotReady { task_id: String, status: TaskStatus },

    /// None of the requested tasks has a readable result.
    #[error("No finished results among {requested} requested tasks")]
    NoResults { requested: usize },

    #[error("Could not read media: {0}")]
    Probe(ConverterError),

    #[error("Task store error: {0}")]
    Store(TaskStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<TaskStoreError> for ServiceError {
    fn from(e: TaskStoreError) -> Self {
        match e {
            TaskStoreError::FileNotFound(id) => Self::FileNotFound(id),
            TaskStoreError::NotFound(id) => Self::TaskNotFound(id),
            TaskStoreError::ActiveTaskExists { file_id, task_id } => Self::InvalidRequest(format!(
                "file {} is already being converted by task {}",
                file_id, task_id
            )),
            other => Self::Store(other),
        }
    }
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidOptions(_) => ErrorCode::InvalidOptions,
            Self::TooManyFiles { .. } => ErrorCode::LimitExceededCount,
            Self::Limit(violation) => violation.code,
            Self::FileNotFound(_)
            | Self::TaskNotFound(_)
            | Self::ResultNotReady { .. }
            | Self::NoResults { .. } => ErrorCode::NotFound,
            Self::Probe(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Queue(e) => e.code(),
        }
    }
}
