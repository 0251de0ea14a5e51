//! FFmpeg-based converter implementation.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult, MediaInfo};

/// Engine messages that mean the input itself cannot be decoded.
static BAD_INPUT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)(invalid data found when processing input|moov atom not found|could not find codec parameters|unknown format|does not contain any stream|error while decoding stream)",
    )
    .ok()
});

/// Keep at most this much of the engine's stderr on an error.
const STDERR_TAIL_BYTES: usize = 4096;

/// FFmpeg-based converter implementation.
pub struct FfmpegConverter {
    config: ConverterConfig,
}

impl FfmpegConverter {
    /// Creates a new FFmpeg converter with the given configuration.
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    /// Builds ffmpeg arguments for a keying job.
    fn build_args(&self, job: &ConversionJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
        ];

        if !job.filter_chain.is_empty() {
            args.extend(["-vf".to_string(), job.filter_chain.render()]);
        }

        args.extend([
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-pix_fmt".to_string(),
            self.config.pixel_format.clone(),
            // alt-ref frames drop the alpha plane in libvpx
            "-auto-alt-ref".to_string(),
            "0".to_string(),
            "-an".to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
        ]);

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output_path.to_string_lossy().to_string());

        args
    }

    /// Maps a non-zero exit into an error, separating bad input from engine trouble.
    fn classify_failure(exit_code: Option<i32>, stderr: String) -> ConverterError {
        let stderr = tail(stderr);
        let bad_input = BAD_INPUT
            .as_ref()
            .and_then(|re| re.find(&stderr))
            .map(|m| m.as_str().to_string());
        let stderr = if stderr.is_empty() { None } else { Some(stderr) };

        match bad_input {
            Some(reason) => ConverterError::bad_input(reason, stderr),
            None => ConverterError::conversion_failed(
                format!("FFmpeg exited with code: {:?}", exit_code),
                stderr,
            ),
        }
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ConverterError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
            r_frame_rate: Option<String>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| ConverterError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let size_bytes = probe
            .format
            .size
            .as_ref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
        let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs,
            format: format_name.to_string(),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
            video_width: video_stream.and_then(|s| s.width),
            video_height: video_stream.and_then(|s| s.height),
            video_fps: video_stream
                .and_then(|s| s.r_frame_rate.as_ref())
                .and_then(|r| parse_frame_rate(r)),
            has_audio,
        })
    }
}

/// Parses a frame rate like "24000/1001" or "30".
fn parse_frame_rate(r: &str) -> Option<f32> {
    match r.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f32>().ok()?;
            let den = den.parse::<f32>().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => r.parse::<f32>().ok(),
    }
}

/// Last `STDERR_TAIL_BYTES` of `s`, cut on a char boundary.
fn tail(s: String) -> String {
    if s.len() <= STDERR_TAIL_BYTES {
        return s;
    }
    let mut start = s.len() - STDERR_TAIL_BYTES;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if !job.input_path.exists() {
            return Err(ConverterError::InputNotFound {
                path: job.input_path.clone(),
            });
        }

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                ConverterError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        let args = self.build_args(&job);
        debug!(job_id = %job.job_id, args = ?args, "Starting ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            ConverterError::Io(std::io::Error::other("ffmpeg stderr was not captured"))
        })?;
        let mut reader = BufReader::new(stderr).lines();

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let result = timeout(timeout_duration, async {
            let mut error_output = String::new();
            while let Ok(Some(line)) = reader.next_line().await {
                error_output.push_str(&line);
                error_output.push('\n');
            }

            let status = child.wait().await?;
            Ok::<(std::process::ExitStatus, String), std::io::Error>((status, error_output))
        })
        .await;

        match result {
            Ok(Ok((status, error_output))) => {
                if !status.success() {
                    return Err(Self::classify_failure(status.code(), error_output));
                }
            }
            Ok(Err(e)) => return Err(ConverterError::Io(e)),
            Err(_) => {
                // Kill the process on timeout
                let _ = child.kill().await;
                return Err(ConverterError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        }

        // Verify output exists and get size
        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("Output file not created", None))?;

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        // Check ffmpeg exists
        let ffmpeg_result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffmpeg_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        // Check ffprobe exists
        let ffprobe_result = Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffprobe_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(ConverterError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(ConverterError::Io(e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::filter::build_filter_chain;
    use crate::options::OptionDefaults;
    use std::path::PathBuf;

    fn job() -> ConversionJob {
        let options = OptionDefaults::default().to_options().unwrap();
        ConversionJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/work/input.mp4"),
            output_path: PathBuf::from("/work/output.webm"),
            filter_chain: build_filter_chain(&options),
        }
    }

    #[test]
    fn test_build_args() {
        let converter = FfmpegConverter::with_defaults();
        let job = job();
        let args = converter.build_args(&job);

        assert_eq!(&args[..3], &["-y", "-i", "/work/input.mp4"]);
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], job.filter_chain.render());
        assert!(args.windows(2).any(|w| w == ["-c:v", "libvpx-vp9"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuva420p"]));
        assert!(args.windows(2).any(|w| w == ["-auto-alt-ref", "0"]));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last().unwrap(), "/work/output.webm");
    }

    #[test]
    fn test_build_args_extra_before_output() {
        let mut config = ConverterConfig::default();
        config.extra_ffmpeg_args = vec!["-threads".to_string(), "2".to_string()];
        let converter = FfmpegConverter::new(config);
        let args = converter.build_args(&job());

        let n = args.len();
        assert_eq!(&args[n - 3..n - 1], &["-threads", "2"]);
    }

    #[test]
    fn test_classify_bad_input() {
        let err = FfmpegConverter::classify_failure(
            Some(1),
            "[mov,mp4,m4a,3gp,3g2,mj2 @ 0x1] moov atom not found\n/work/input.mp4: Invalid data found when processing input\n".to_string(),
        );
        assert!(matches!(err, ConverterError::BadInput { .. }));
        assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_engine_failure() {
        let err = FfmpegConverter::classify_failure(
            Some(137),
            "Killed\n".to_string(),
        );
        assert!(matches!(err, ConverterError::ConversionFailed { .. }));
        assert_eq!(err.code(), ErrorCode::EngineFailed);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 10) + "end";
        let t = tail(long);
        assert_eq!(t.len(), STDERR_TAIL_BYTES);
        assert!(t.ends_with("end"));
    }

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "filename": "a.mp4",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "9.800000",
                "size": "2048000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "r_frame_rate": "30000/1001"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac"
                }
            ]
        }"#;

        let info = FfmpegConverter::parse_probe_output(Path::new("a.mp4"), json).unwrap();
        assert_eq!(info.format, "mov");
        assert!((info.duration_secs - 9.8).abs() < 0.001);
        assert_eq!(info.size_bytes, 2048000);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.video_width, Some(1920));
        assert!(info.has_video());
        assert!(info.has_audio);
        let fps = info.video_fps.unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        let json = r#"{
            "format": {"format_name": "mp3", "duration": "3.0"},
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}]
        }"#;
        let info = FfmpegConverter::parse_probe_output(Path::new("a.mp3"), json).unwrap();
        assert!(!info.has_video());
        assert_eq!(info.size_bytes, 0);
    }

    #[test]
    fn test_parse_probe_output_garbage() {
        let err = FfmpegConverter::parse_probe_output(Path::new("x"), "not json").unwrap_err();
        assert!(matches!(err, ConverterError::ParseError { .. }));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let converter = FfmpegConverter::with_defaults();
        let err = converter
            .probe(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConverterError::InputNotFound { .. }));
    }
}
