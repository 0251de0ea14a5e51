//! Error types for the converter module.

use std::path::PathBuf;
use thiserror::Error;

use crate::error::ErrorCode;

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// FFprobe binary not found.
    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Output directory does not exist and could not be created.
    #[error("Failed to create output directory: {path}")]
    OutputDirectoryFailed { path: PathBuf },

    /// The engine rejected the input itself (corrupt or not a video).
    #[error("Unreadable input: {reason}")]
    BadInput {
        reason: String,
        stderr: Option<String>,
    },

    /// Conversion process failed.
    #[error("Conversion failed: {reason}")]
    ConversionFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Conversion timed out.
    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Failed to probe media file.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse FFprobe output.
    #[error("Failed to parse media info: {reason}")]
    ParseError { reason: String },
}

impl ConverterError {
    /// Creates a new conversion failed error with stderr output.
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new bad input error with stderr output.
    pub fn bad_input(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::BadInput {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new probe failed error.
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Whether this error is retryable.
    ///
    /// Engine crashes and I/O trouble may pass on another attempt; input
    /// problems and a missing engine will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Io(_)
                | Self::ConversionFailed { .. }
                | Self::OutputDirectoryFailed { .. }
        )
    }

    /// Error code reported on the task.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::BadInput { .. } | Self::ProbeFailed { .. } | Self::ParseError { .. } => {
                ErrorCode::UnsupportedFormat
            }
            Self::FfmpegNotFound { .. }
            | Self::FfprobeNotFound { .. }
            | Self::InputNotFound { .. }
            | Self::OutputDirectoryFailed { .. }
            | Self::ConversionFailed { .. }
            | Self::Io(_) => ErrorCode::EngineFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let crash = ConverterError::conversion_failed("exit 1", None);
        assert!(crash.is_retryable());
        assert_eq!(crash.code(), ErrorCode::EngineFailed);

        let bad = ConverterError::bad_input("moov atom not found", None);
        assert!(!bad.is_retryable());
        assert_eq!(bad.code(), ErrorCode::UnsupportedFormat);

        let timeout = ConverterError::Timeout { timeout_secs: 5 };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.code(), ErrorCode::Timeout);

        let missing = ConverterError::FfmpegNotFound {
            path: PathBuf::from("ffmpeg"),
        };
        assert!(!missing.is_retryable());
    }
}
