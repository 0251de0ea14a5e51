//! Types for conversion workers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LimitViolation;
use crate::converter::ConverterError;
use crate::error::ErrorCode;
use crate::queue::QueueError;
use crate::storage::StorageError;
use crate::task::TaskStoreError;

/// Errors that end one processing attempt.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The uploaded file record is gone (purged or never registered).
    #[error("File not found: {0}")]
    FileMissing(String),

    /// The input breaks a configured limit.
    #[error(transparent)]
    Input(#[from] LimitViolation),

    /// Another worker took the lease while this one was still working.
    #[error("Lease on task {0} was lost")]
    LeaseLost(String),

    #[error("Task store error: {0}")]
    Store(#[from] TaskStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Converter(#[from] ConverterError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Work directory error: {0}")]
    WorkDir(#[from] std::io::Error),
}

impl WorkerError {
    /// Code recorded on the task when this error ends it.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FileMissing(_) => ErrorCode::NotFound,
            Self::Input(violation) => violation.code,
            Self::LeaseLost(_) => ErrorCode::InternalError,
            Self::Store(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Converter(e) => e.code(),
            Self::Queue(e) => e.code(),
            Self::WorkDir(_) => ErrorCode::StorageError,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FileMissing(_) | Self::Input(_) | Self::LeaseLost(_) | Self::Queue(_) => false,
            Self::Store(e) => matches!(e, TaskStoreError::Database(_)),
            Self::Storage(e) => e.is_retryable(),
            Self::Converter(e) => e.is_retryable(),
            Self::WorkDir(_) => true,
        }
    }
}

/// What happened to one delivered task ID.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The claim was refused: unknown, finished, or leased elsewhere.
    Discarded,
    Succeeded { result_url: String },
    /// Lease released; the ID comes back after `delay_ms`.
    Retrying { attempts: u32, delay_ms: u64 },
    Failed { code: ErrorCode },
}

/// Snapshot of the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerPoolStatus {
    pub running: bool,
    pub workers: usize,
    /// Deliveries currently being processed.
    pub active: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = WorkerError::FileMissing("f1".to_string());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(!err.is_retryable());

        let err = WorkerError::Converter(ConverterError::Timeout { timeout_secs: 300 });
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.is_retryable());

        let err = WorkerError::Converter(ConverterError::bad_input(
            "invalid data",
            Some("moov atom not found".to_string()),
        ));
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
        assert!(!err.is_retryable());

        let err = WorkerError::Input(LimitViolation {
            code: ErrorCode::LimitExceededDuration,
            message: "too long".to_string(),
        });
        assert_eq!(err.code(), ErrorCode::LimitExceededDuration);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "too long");

        let err = WorkerError::Storage(StorageError::Io {
            key: "raw/a.mp4".to_string(),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(err.code(), ErrorCode::StorageError);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_pool_status_default() {
        let status = WorkerPoolStatus::default();
        assert!(!status.running);
        assert_eq!(status.processed, 0);
    }
}
