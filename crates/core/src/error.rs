//! Stable error codes surfaced to callers.

use serde::{Deserialize, Serialize};

/// Error code attached to failed tasks and rejected requests.
///
/// The serialized form is the SCREAMING_SNAKE_CASE name, which is what
/// polling clients see in `errorCode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LimitExceededSize,
    LimitExceededCount,
    LimitExceededDuration,
    UnsupportedFormat,
    InvalidOptions,
    InvalidRequest,
    EngineFailed,
    StorageError,
    Timeout,
    NotFound,
    InternalError,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LimitExceededSize => "LIMIT_EXCEEDED_SIZE",
            ErrorCode::LimitExceededCount => "LIMIT_EXCEEDED_COUNT",
            ErrorCode::LimitExceededDuration => "LIMIT_EXCEEDED_DURATION",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::InvalidOptions => "INVALID_OPTIONS",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::EngineFailed => "ENGINE_FAILED",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parses a wire name back into a code.
    pub fn parse(s: &str) -> Option<Self> {
        let code = match s {
            "LIMIT_EXCEEDED_SIZE" => ErrorCode::LimitExceededSize,
            "LIMIT_EXCEEDED_COUNT" => ErrorCode::LimitExceededCount,
            "LIMIT_EXCEEDED_DURATION" => ErrorCode::LimitExceededDuration,
            "UNSUPPORTED_FORMAT" => ErrorCode::UnsupportedFormat,
            "INVALID_OPTIONS" => ErrorCode::InvalidOptions,
            "INVALID_REQUEST" => ErrorCode::InvalidRequest,
            "ENGINE_FAILED" => ErrorCode::EngineFailed,
            "STORAGE_ERROR" => ErrorCode::StorageError,
            "TIMEOUT" => ErrorCode::Timeout,
            "NOT_FOUND" => ErrorCode::NotFound,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            _ => return None,
        };
        Some(code)
    }

    /// Whether a failure with this code is caused by the caller's input.
    ///
    /// Input failures are terminal and never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::LimitExceededSize
                | ErrorCode::LimitExceededCount
                | ErrorCode::LimitExceededDuration
                | ErrorCode::UnsupportedFormat
                | ErrorCode::InvalidOptions
                | ErrorCode::InvalidRequest
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_wire_name() {
        let json = serde_json::to_string(&ErrorCode::LimitExceededDuration).unwrap();
        assert_eq!(json, "\"LIMIT_EXCEEDED_DURATION\"");

        let parsed: ErrorCode = serde_json::from_str("\"STORAGE_ERROR\"").unwrap();
        assert_eq!(parsed, ErrorCode::StorageError);
    }

    #[test]
    fn test_parse_matches_as_str() {
        for code in [
            ErrorCode::LimitExceededSize,
            ErrorCode::EngineFailed,
            ErrorCode::Timeout,
            ErrorCode::NotFound,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NOPE"), None);
    }

    #[test]
    fn test_input_errors() {
        assert!(ErrorCode::UnsupportedFormat.is_input_error());
        assert!(ErrorCode::LimitExceededDuration.is_input_error());
        assert!(!ErrorCode::EngineFailed.is_input_error());
        assert!(!ErrorCode::StorageError.is_input_error());
    }
}
