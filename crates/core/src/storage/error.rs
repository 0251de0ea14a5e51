//! Error types for the storage module.

use thiserror::Error;

use crate::error::ErrorCode;

/// Errors from an object store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object under the key.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Key is empty, absolute, or escapes the store.
    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    /// Written bytes do not hash to what was read.
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                key: key.to_string(),
            }
        } else {
            Self::Io {
                key: key.to_string(),
                source,
            }
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ChecksumMismatch { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidKey { .. } => ErrorCode::InternalError,
            Self::ChecksumMismatch { .. } | Self::Io { .. } => ErrorCode::StorageError,
        }
    }
}
