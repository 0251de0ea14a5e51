//! Converter module for the keying transcode.
//!
//! This module provides the `Converter` trait and an FFmpeg implementation
//! that applies a [`FilterChain`](crate::filter::FilterChain) and encodes
//! WebM/VP9 with an alpha plane and no audio.
//!
//! # Example
//!
//! ```ignore
//! use alphavid_core::converter::{ConversionJob, Converter, FfmpegConverter};
//! use alphavid_core::filter::build_filter_chain;
//!
//! let converter = FfmpegConverter::with_defaults();
//! converter.validate().await?;
//!
//! let info = converter.probe(Path::new("/path/to/clip.mp4")).await?;
//! println!("Duration: {} seconds", info.duration_secs);
//!
//! let job = ConversionJob {
//!     job_id: "job-1".to_string(),
//!     input_path: PathBuf::from("/path/to/clip.mp4"),
//!     output_path: PathBuf::from("/path/to/clip.webm"),
//!     filter_chain: build_filter_chain(&options),
//! };
//! let result = converter.convert(job).await?;
//! println!("Converted in {} ms", result.duration_ms);
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use ffmpeg::FfmpegConverter;
pub use traits::Converter;
pub use types::{ConversionJob, ConversionResult, MediaInfo};
