//! Testing utilities and mock implementations for E2E tests.
//!
//! The engine is the only external process the system drives, so it is the
//! one dependency with a mock. Stores, queue and object storage have cheap
//! real implementations (in-memory SQLite, temp directories) that tests use
//! directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use alphavid_core::testing::{fixtures, MockConverter};
//!
//! let converter = MockConverter::new();
//! converter.set_default_duration(45.0).await;
//!
//! let options = fixtures::default_options();
//! ```

mod mock_converter;

pub use mock_converter::{MockConverter, RecordedConversion, MOCK_OUTPUT};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::converter::MediaInfo;
    use crate::options::{ConvertOptions, RgbColor};
    use crate::task::NewUploadedFile;
    use std::path::PathBuf;

    /// The built-in default options.
    pub fn default_options() -> ConvertOptions {
        ConvertOptions {
            color: RgbColor::BLACK,
            tolerance: 10,
            feather: 0.5,
            edge_enhancement: true,
            edge_threshold_low: 0.1,
            edge_threshold_high: 0.4,
            morphology_iterations: 1,
            remove_watermark: true,
            wm_x: 1.2,
            wm_y: 1.2,
            wm_w: 14.0,
            wm_h: 5.5,
        }
    }

    /// A new file record with a raw key under `raw/2024/01/01/`.
    pub fn uploaded_file(id: &str, name: &str, duration_secs: f64) -> NewUploadedFile {
        let ext = name.rsplit('.').next().unwrap_or("mp4");
        NewUploadedFile {
            id: id.to_string(),
            name: name.to_string(),
            size_bytes: 1024 * 1024, // 1 MB
            duration_secs,
            storage_key: format!("raw/2024/01/01/{}.{}", id, ext),
        }
    }

    /// Probe result of a 720p H.264 clip.
    pub fn video_info(path: &str, duration_secs: f64) -> MediaInfo {
        MediaInfo {
            path: PathBuf::from(path),
            size_bytes: 1024 * 1024,
            duration_secs,
            format: "mov".to_string(),
            video_codec: Some("h264".to_string()),
            video_width: Some(1280),
            video_height: Some(720),
            video_fps: Some(30.0),
            has_audio: true,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::options::OptionDefaults;

        #[test]
        fn test_default_options_match_built_in_defaults() {
            assert_eq!(default_options(), OptionDefaults::default().to_options().unwrap());
        }
    }
}
