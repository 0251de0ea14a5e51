use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::converter::ConverterConfig;
use crate::error::ErrorCode;
use crate::options::OptionDefaults;
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub defaults: OptionDefaults,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_filter() -> String {
    "info,tower_http=debug".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("alphavid.db")
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory of the local object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Base URL that stored keys are appended to when building result URLs.
    /// When unset, results are addressed with `file://` URLs.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Hours an uploaded file and its results are kept.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
            retention_hours: default_retention_hours(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_retention_hours() -> u64 {
    24
}

/// Upload and batch limits
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_files_per_batch")]
    pub max_files_per_batch: usize,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: f64,
    /// Accepted container extensions, lowercase, without the dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            max_files_per_batch: default_max_files_per_batch(),
            max_duration_secs: default_max_duration_secs(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_max_files_per_batch() -> usize {
    10
}

fn default_max_duration_secs() -> f64 {
    30.0
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "mov".to_string(), "webm".to_string()]
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Returns the lowercase extension of `name` if it is an accepted container.
    pub fn accepted_extension(&self, name: &str) -> Option<String> {
        let ext = std::path::Path::new(name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
            .then_some(ext)
    }

    /// Checks a file against the container, size and duration limits.
    /// Returns the accepted extension.
    pub fn check_file(
        &self,
        name: &str,
        size_bytes: u64,
        duration_secs: f64,
    ) -> Result<String, LimitViolation> {
        let ext = self.accepted_extension(name).ok_or_else(|| LimitViolation {
            code: ErrorCode::UnsupportedFormat,
            message: format!(
                "{}: unsupported container (allowed: {})",
                name,
                self.allowed_extensions.join(", ")
            ),
        })?;
        if size_bytes > self.max_file_size_bytes() {
            return Err(LimitViolation {
                code: ErrorCode::LimitExceededSize,
                message: format!(
                    "{}: {} bytes exceeds the {} MB limit",
                    name, size_bytes, self.max_file_size_mb
                ),
            });
        }
        if !duration_secs.is_finite() || duration_secs > self.max_duration_secs {
            return Err(LimitViolation {
                code: ErrorCode::LimitExceededDuration,
                message: format!(
                    "{}: duration {:.1}s exceeds the {}s limit",
                    name, duration_secs, self.max_duration_secs
                ),
            });
        }
        Ok(ext)
    }
}

/// A file that breaks one of the configured limits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LimitViolation {
    pub code: ErrorCode,
    pub message: String,
}

/// Sanitized config for API responses (filesystem paths left out)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub limits: LimitsConfig,
    pub defaults: OptionDefaults,
    pub worker: SanitizedWorkerConfig,
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedWorkerConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub max_retries: u32,
    pub engine_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            limits: config.limits.clone(),
            defaults: config.defaults.clone(),
            worker: SanitizedWorkerConfig {
                enabled: config.worker.enabled,
                concurrency: config.worker.concurrency,
                max_retries: config.worker.max_retries,
                engine_timeout_secs: config.converter.timeout_secs,
            },
            retention_hours: config.storage.retention_hours,
        }
    }
}
