//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task intake (tasks created, uploads rejected)
//! - Workers (conversions, durations, retries)
//! - Supervisor (lease requeues, retention purges)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Intake
// =============================================================================

/// Tasks accepted by `convert`.
pub static TASKS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("alphavid_tasks_created_total", "Total tasks created").unwrap()
});

/// Uploads and convert requests rejected by validation, by error code.
pub static REQUESTS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "alphavid_requests_rejected_total",
            "Requests rejected before any task was created",
        ),
        &["code"],
    )
    .unwrap()
});

// =============================================================================
// Workers
// =============================================================================

/// Finished conversions by result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("alphavid_conversions_total", "Total conversions by result"),
        &["result"], // "success" or an error code
    )
    .unwrap()
});

/// Wall time of a delivery from claim to terminal state.
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "alphavid_conversion_duration_seconds",
            "Duration of one conversion attempt",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["result"],
    )
    .unwrap()
});

/// Retries scheduled after a transient failure, by error code.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("alphavid_retry_attempts_total", "Total retries scheduled"),
        &["code"],
    )
    .unwrap()
});

// =============================================================================
// Supervisor
// =============================================================================

/// Tasks put back on the queue after their lease expired.
pub static LEASE_REQUEUES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "alphavid_lease_requeues_total",
        "Tasks requeued after lease expiry",
    )
    .unwrap()
});

/// Files removed by the retention sweep.
pub static FILES_PURGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "alphavid_files_purged_total",
        "Files removed by retention",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_CREATED.clone()),
        Box::new(REQUESTS_REJECTED.clone()),
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(LEASE_REQUEUES.clone()),
        Box::new(FILES_PURGED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_all_metrics_register() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        TASKS_CREATED.inc();
        CONVERSIONS_TOTAL.with_label_values(&["success"]).inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"alphavid_tasks_created_total".to_string()));
        assert!(names.contains(&"alphavid_conversions_total".to_string()));
    }
}
