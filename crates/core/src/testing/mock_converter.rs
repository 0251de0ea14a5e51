//! Mock converter for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::converter::{ConversionJob, ConversionResult, Converter, ConverterError, MediaInfo};

/// Bytes written as the "encoded" output of every successful conversion.
pub const MOCK_OUTPUT: &[u8] = b"\x1a\x45\xdf\xa3mock-webm";

/// A recorded conversion job for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    /// The job that was submitted.
    pub job: ConversionJob,
    /// Whether the conversion succeeded.
    pub success: bool,
}

/// Mock implementation of the Converter trait.
///
/// Provides controllable behavior for testing:
/// - Track conversion jobs for assertions
/// - Queue failures for the next operations
/// - Control probe results
///
/// # Example
///
/// ```rust,ignore
/// use alphavid_core::testing::MockConverter;
///
/// let converter = MockConverter::new();
/// converter.set_default_duration(45.0).await;
/// converter
///     .set_next_error(ConverterError::Timeout { timeout_secs: 300 })
///     .await;
///
/// let result = converter.convert(job).await;
/// assert_eq!(converter.conversion_count().await, 1);
/// ```
#[derive(Debug)]
pub struct MockConverter {
    /// Recorded conversions.
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    /// Pre-configured probe results by path.
    probe_results: Arc<RwLock<HashMap<PathBuf, MediaInfo>>>,
    /// Errors returned by the next operations, in order.
    next_errors: Arc<RwLock<VecDeque<ConverterError>>>,
    /// Simulated conversion duration in milliseconds.
    conversion_duration_ms: Arc<RwLock<u64>>,
    /// Duration reported when probing unknown files.
    default_duration_secs: Arc<RwLock<f64>>,
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConverter {
    /// Create a new mock converter.
    pub fn new() -> Self {
        Self {
            conversions: Arc::new(RwLock::new(Vec::new())),
            probe_results: Arc::new(RwLock::new(HashMap::new())),
            next_errors: Arc::new(RwLock::new(VecDeque::new())),
            conversion_duration_ms: Arc::new(RwLock::new(0)),
            default_duration_secs: Arc::new(RwLock::new(9.8)),
        }
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of conversions performed.
    pub async fn conversion_count(&self) -> usize {
        self.conversions.read().await.len()
    }

    /// Set a probe result for a specific path.
    pub async fn set_probe_result(&self, path: impl AsRef<Path>, info: MediaInfo) {
        self.probe_results
            .write()
            .await
            .insert(path.as_ref().to_path_buf(), info);
    }

    /// Set the duration reported for files without a probe result.
    pub async fn set_default_duration(&self, secs: f64) {
        *self.default_duration_secs.write().await = secs;
    }

    /// Queue an error for the next operation. Errors are consumed in order.
    pub async fn set_next_error(&self, error: ConverterError) {
        self.next_errors.write().await.push_back(error);
    }

    /// Clear any pending errors.
    pub async fn clear_next_error(&self) {
        self.next_errors.write().await.clear();
    }

    /// Set the simulated conversion duration.
    pub async fn set_conversion_duration(&self, duration: Duration) {
        *self.conversion_duration_ms.write().await = duration.as_millis() as u64;
    }

    async fn take_error(&self) -> Option<ConverterError> {
        self.next_errors.write().await.pop_front()
    }

    async fn default_info(&self, path: &Path) -> MediaInfo {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown")
            .to_string();
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs: *self.default_duration_secs.read().await,
            format,
            video_codec: Some("h264".to_string()),
            video_width: Some(1280),
            video_height: Some(720),
            video_fps: Some(30.0),
            has_audio: true,
        }
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        if let Some(info) = self.probe_results.read().await.get(path) {
            return Ok(info.clone());
        }

        Ok(self.default_info(path).await)
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        if let Some(err) = self.take_error().await {
            self.conversions.write().await.push(RecordedConversion {
                job,
                success: false,
            });
            return Err(err);
        }

        if !job.input_path.exists() {
            return Err(ConverterError::InputNotFound {
                path: job.input_path.clone(),
            });
        }

        let duration_ms = *self.conversion_duration_ms.read().await;
        if duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }

        tokio::fs::write(&job.output_path, MOCK_OUTPUT).await?;

        self.conversions.write().await.push(RecordedConversion {
            job: job.clone(),
            success: true,
        });

        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: MOCK_OUTPUT.len() as u64,
            duration_ms,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use tempfile::TempDir;

    fn create_test_job(dir: &TempDir, id: &str) -> ConversionJob {
        let input_path = dir.path().join(format!("{}.mp4", id));
        std::fs::write(&input_path, b"input").unwrap();
        ConversionJob {
            job_id: id.to_string(),
            input_path,
            output_path: dir.path().join(format!("{}.webm", id)),
            filter_chain: FilterChain::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_basic_conversion_writes_output() {
        let dir = TempDir::new().unwrap();
        let converter = MockConverter::new();

        let job = create_test_job(&dir, "test-1");
        let result = converter.convert(job).await.unwrap();

        assert_eq!(result.job_id, "test-1");
        assert_eq!(std::fs::read(&result.output_path).unwrap(), MOCK_OUTPUT);
    }

    #[tokio::test]
    async fn test_probe_defaults_and_overrides() {
        let converter = MockConverter::new();

        let info = converter.probe(Path::new("/test/a.mp4")).await.unwrap();
        assert_eq!(info.format, "mp4");
        assert_eq!(info.duration_secs, 9.8);
        assert!(info.has_video());

        converter.set_default_duration(45.0).await;
        let info = converter.probe(Path::new("/test/b.mov")).await.unwrap();
        assert_eq!(info.duration_secs, 45.0);

        let mut custom = info.clone();
        custom.path = PathBuf::from("/custom/c.webm");
        custom.duration_secs = 3.0;
        converter.set_probe_result("/custom/c.webm", custom).await;
        let info = converter.probe(Path::new("/custom/c.webm")).await.unwrap();
        assert_eq!(info.duration_secs, 3.0);
    }

    #[tokio::test]
    async fn test_errors_are_consumed_in_order() {
        let dir = TempDir::new().unwrap();
        let converter = MockConverter::new();
        converter
            .set_next_error(ConverterError::Timeout { timeout_secs: 1 })
            .await;
        converter
            .set_next_error(ConverterError::conversion_failed("boom", None))
            .await;

        let first = converter.convert(create_test_job(&dir, "a")).await;
        assert!(matches!(first, Err(ConverterError::Timeout { .. })));
        let second = converter.convert(create_test_job(&dir, "b")).await;
        assert!(matches!(second, Err(ConverterError::ConversionFailed { .. })));
        assert!(converter.convert(create_test_job(&dir, "c")).await.is_ok());

        let conversions = converter.recorded_conversions().await;
        assert_eq!(conversions.len(), 3);
        assert!(!conversions[0].success);
        assert!(conversions[2].success);
    }
}
