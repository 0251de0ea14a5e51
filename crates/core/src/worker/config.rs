//! Worker pool configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for conversion workers and the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Enable/disable background processing.
    /// When disabled, tasks are accepted but stay PENDING.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of worker loops pulling from the queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Lease granted on claim and renewed on each progress report.
    /// Must exceed the engine timeout.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Extra attempts after the first one for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff; doubled for every attempt already made.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How often expired leases are swept (seconds).
    #[serde(default = "default_lease_sweep_interval")]
    pub lease_sweep_interval_secs: u64,

    /// How often the retention purge runs (seconds).
    #[serde(default = "default_retention_sweep_interval")]
    pub retention_sweep_interval_secs: u64,

    /// Scratch directory for per-task input and output files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_lease_secs() -> u64 {
    900 // 15 minutes
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_lease_sweep_interval() -> u64 {
    30
}

fn default_retention_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("alphavid-work")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
            lease_secs: default_lease_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            lease_sweep_interval_secs: default_lease_sweep_interval(),
            retention_sweep_interval_secs: default_retention_sweep_interval(),
            work_dir: default_work_dir(),
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_lease_secs(mut self, lease_secs: u64) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    pub fn with_retry_backoff_ms(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Total attempts a task may consume, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before re-delivering a task that has made `attempts` attempts.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << exponent))
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.lease_secs, 900);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_attempts(), 3);
        assert!(config.work_dir.ends_with("alphavid-work"));
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: WorkerConfig = toml::from_str("concurrency = 8").unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_backoff_ms, 2000);
        assert!(config.enabled);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = WorkerConfig::default().with_retry_backoff_ms(100);
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
        // attempt counter never starts at zero, but stay sane if it does
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
    }
}
