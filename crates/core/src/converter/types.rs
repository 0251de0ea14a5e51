//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::filter::FilterChain;

/// A single conversion to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Unique job identifier.
    pub job_id: String,
    /// Input file path.
    pub input_path: PathBuf,
    /// Output file path (WebM).
    pub output_path: PathBuf,
    /// Video filters to apply.
    pub filter_chain: FilterChain,
}

/// Result of a completed conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    /// Wall-clock time spent in the engine.
    pub duration_ms: u64,
}

/// Information about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Container format name (first of ffprobe's list).
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_fps: Option<f32>,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Whether the file carries a video stream.
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }
}
