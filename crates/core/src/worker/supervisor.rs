//! Background upkeep: queue recovery, lease sweeps and retention purges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::ErrorCode;
use crate::metrics;
use crate::queue::TaskQueue;
use crate::storage::ObjectStore;
use crate::task::{PurgeReport, Task, TaskMutation, TaskStatus, TaskStore};

use super::config::WorkerConfig;
use super::types::WorkerError;

/// Upper bound of tasks re-enqueued per status on startup.
const RECOVERY_LIMIT: usize = 10_000;

/// Result of one lease sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    /// PENDING tasks found missing from the queue.
    pub pending_enqueued: usize,
}

/// Keeps the queue and the store consistent while workers come and go.
pub struct Supervisor {
    config: WorkerConfig,
    retention: chrono::Duration,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Supervisor {
    pub fn new(
        config: WorkerConfig,
        retention_hours: u64,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            retention: chrono::Duration::hours(retention_hours as i64),
            store,
            queue,
            objects,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    /// Recovers the queue, then spawns the sweep loops.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Supervisor already running");
            return;
        }

        info!("Starting supervisor");

        match self.recover_queue().await {
            Ok(0) => {}
            Ok(n) => info!(tasks = n, "Recovered queued tasks"),
            Err(e) => error!(error = %e, "Failed to recover queued tasks"),
        }

        self.spawn_lease_sweep_loop();
        self.spawn_retention_loop();
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Supervisor not running");
            return;
        }
        info!("Stopping supervisor");
        let _ = self.shutdown_tx.send(());
    }

    /// Re-enqueues every task a worker could claim right now.
    pub async fn recover_queue(&self) -> Result<usize, WorkerError> {
        let now = Utc::now();
        let mut recovered = 0;
        for status in [TaskStatus::Pending, TaskStatus::Running] {
            for task in self.store.list_by_status(status, RECOVERY_LIMIT)? {
                if task.is_claimable(now) && self.queue.enqueue(&task.id).await? {
                    debug!(task_id = %task.id, status = %task.status, "Re-enqueued task");
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }

    /// Handles every RUNNING task whose lease has expired, then re-enqueues
    /// PENDING tasks older than one sweep interval.
    ///
    /// Each expiry is handled once: the release pushes the deadline a full
    /// lease into the future, so the next sweep skips the task unless it
    /// expires again. Re-enqueueing a PENDING task that is still queued is a
    /// no-op.
    pub async fn sweep_leases(&self) -> Result<SweepReport, WorkerError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for task in self.store.list_expired_leases(now)? {
            match self.handle_expired(&task).await {
                Ok(true) => report.requeued += 1,
                Ok(false) => report.failed += 1,
                // Claimed or finished since the listing.
                Err(e) => debug!(task_id = %task.id, error = %e, "Skipping expired lease"),
            }
        }

        let settled =
            now - chrono::Duration::seconds(self.config.lease_sweep_interval_secs as i64);
        for task in self.store.list_by_status(TaskStatus::Pending, RECOVERY_LIMIT)? {
            if task.created_at <= settled && self.queue.enqueue(&task.id).await? {
                warn!(task_id = %task.id, "Re-enqueued PENDING task missing from the queue");
                report.pending_enqueued += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                requeued = report.requeued,
                failed = report.failed,
                pending_enqueued = report.pending_enqueued,
                "Lease sweep finished"
            );
        }
        Ok(report)
    }

    /// Returns `true` if the task was requeued, `false` if it was failed.
    async fn handle_expired(&self, task: &Task) -> Result<bool, WorkerError> {
        if task.attempts >= self.config.max_attempts() {
            self.store.update(
                &task.id,
                TaskMutation::Fail {
                    worker_id: None,
                    code: ErrorCode::Timeout,
                    message: format!("lease expired after {} attempts", task.attempts),
                },
            )?;
            warn!(task_id = %task.id, attempts = task.attempts, "Task failed after lease expiry");
            metrics::CONVERSIONS_TOTAL
                .with_label_values(&[ErrorCode::Timeout.as_str()])
                .inc();
            return Ok(false);
        }

        // A held lease that lapsed means the worker died mid-attempt.
        let error = task.lease_owner.as_ref().map(|owner| {
            (
                ErrorCode::Timeout,
                format!("lease held by {} expired", owner),
            )
        });
        self.store.update(
            &task.id,
            TaskMutation::Release {
                worker_id: None,
                error,
                redeliver_by: Utc::now() + self.config.lease(),
            },
        )?;
        self.queue.enqueue(&task.id).await?;

        warn!(
            task_id = %task.id,
            previous_owner = task.lease_owner.as_deref().unwrap_or("-"),
            attempts = task.attempts,
            "Requeued task after lease expiry"
        );
        metrics::LEASE_REQUEUES.inc();
        Ok(true)
    }

    /// Removes files past retention, their tasks, and their stored objects.
    pub async fn purge_expired(&self) -> Result<PurgeReport, WorkerError> {
        let cutoff = Utc::now() - self.retention;
        let report = self.store.purge_expired(cutoff)?;

        for key in &report.storage_keys {
            if let Err(e) = self.objects.delete(key).await {
                warn!(key = %key, error = %e, "Failed to delete expired object");
            }
        }

        if report.files_removed > 0 {
            info!(
                files = report.files_removed,
                tasks = report.tasks_removed,
                objects = report.storage_keys.len(),
                "Purged expired files"
            );
            metrics::FILES_PURGED.inc_by(report.files_removed as u64);
        }
        Ok(report)
    }

    fn spawn_lease_sweep_loop(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let interval = Duration::from_secs(self.config.lease_sweep_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Lease sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Lease sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !supervisor.running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = supervisor.sweep_leases().await {
                            error!(error = %e, "Lease sweep failed");
                        }
                    }
                }
            }
        });
    }

    fn spawn_retention_loop(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let interval = Duration::from_secs(self.config.retention_sweep_interval_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Retention loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Retention loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !supervisor.running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = supervisor.purge_expired().await {
                            error!(error = %e, "Retention purge failed");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::build_filter_chain;
    use crate::options::OptionDefaults;
    use crate::queue::MemoryTaskQueue;
    use crate::storage::LocalObjectStore;
    use crate::task::{NewUploadedFile, SqliteTaskStore};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        store: Arc<SqliteTaskStore>,
        queue: Arc<MemoryTaskQueue>,
        objects: Arc<LocalObjectStore>,
        supervisor: Arc<Supervisor>,
    }

    fn harness(retention_hours: u64) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let queue = Arc::new(MemoryTaskQueue::new());
        let objects = Arc::new(LocalObjectStore::new(dir.path().join("objects")));
        let supervisor = Supervisor::new(
            WorkerConfig::default(),
            retention_hours,
            store.clone(),
            queue.clone(),
            objects.clone(),
        );
        Harness {
            dir,
            store,
            queue,
            objects,
            supervisor,
        }
    }

    fn create_task(store: &SqliteTaskStore, file_id: &str) -> Task {
        store
            .register_file(NewUploadedFile {
                id: file_id.to_string(),
                name: "a.mp4".to_string(),
                size_bytes: 10,
                duration_secs: 9.8,
                storage_key: format!("raw/2024/01/01/{}.mp4", file_id),
            })
            .unwrap();
        let options = OptionDefaults::default().to_options().unwrap();
        store
            .create(file_id, &options, &build_filter_chain(&options))
            .unwrap()
    }

    /// Claims the task with a lease that has already run out.
    fn crash_while_running(store: &SqliteTaskStore, task_id: &str, worker: &str) {
        store
            .update(
                task_id,
                TaskMutation::Claim {
                    worker_id: worker.to_string(),
                    lease_until: Utc::now() - chrono::Duration::seconds(1),
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_recover_queue_enqueues_pending_tasks() {
        let h = harness(24);
        let a = create_task(&h.store, "f1");
        let b = create_task(&h.store, "f2");
        // Validly leased tasks stay with their worker.
        h.store
            .update(
                &b.id,
                TaskMutation::Claim {
                    worker_id: "w1".to_string(),
                    lease_until: Utc::now() + chrono::Duration::minutes(5),
                },
            )
            .unwrap();

        assert_eq!(h.supervisor.recover_queue().await.unwrap(), 1);
        assert_eq!(h.queue.dequeue().await.unwrap(), a.id);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued_once() {
        let h = harness(24);
        let task = create_task(&h.store, "f1");
        crash_while_running(&h.store, &task.id, "w1");

        let report = h.supervisor.sweep_leases().await.unwrap();
        assert_eq!(report, SweepReport { requeued: 1, ..Default::default() });
        assert_eq!(h.queue.len().await, 1);

        let released = h.store.get(&task.id).unwrap();
        assert_eq!(released.status, TaskStatus::Running);
        assert!(released.lease_owner.is_none());
        assert_eq!(released.error_code, Some(ErrorCode::Timeout));

        // The same expiry is never handled twice.
        let report = h.supervisor.sweep_leases().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_on_last_attempt_fails() {
        let h = harness(24);
        let task = create_task(&h.store, "f1");
        for _ in 0..3 {
            crash_while_running(&h.store, &task.id, "w1");
        }

        let report = h.supervisor.sweep_leases().await.unwrap();
        assert_eq!(report, SweepReport { failed: 1, ..Default::default() });

        let failed = h.store.get(&task.id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error_code, Some(ErrorCode::Timeout));
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_enqueues_pending_task_missing_from_queue() {
        let h = harness(24);
        let mut config = WorkerConfig::default();
        config.lease_sweep_interval_secs = 0;
        let supervisor = Supervisor::new(
            config,
            24,
            h.store.clone(),
            h.queue.clone(),
            h.objects.clone(),
        );
        // Created without an enqueue, as after a failed submission enqueue.
        let task = create_task(&h.store, "f1");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = supervisor.sweep_leases().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                pending_enqueued: 1,
                ..Default::default()
            }
        );
        assert_eq!(h.queue.len().await, 1);

        // Still queued, so the next sweep adds nothing.
        let report = supervisor.sweep_leases().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(h.queue.dequeue().await.unwrap(), task.id);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_pending_tasks_alone() {
        let h = harness(24);
        create_task(&h.store, "f1");

        let report = h.supervisor.sweep_leases().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_deletes_stored_objects() {
        let h = harness(1);
        create_task(&h.store, "f1");
        let source = h.dir.path().join("src.mp4");
        tokio::fs::write(&source, b"raw").await.unwrap();
        h.objects.put("raw/2024/01/01/f1.mp4", &source).await.unwrap();

        // Nothing is an hour old yet.
        let report = h.supervisor.purge_expired().await.unwrap();
        assert_eq!(report.files_removed, 0);
        assert!(h.objects.exists("raw/2024/01/01/f1.mp4").await.unwrap());

        let zero_retention = Supervisor::new(
            WorkerConfig::default(),
            0,
            h.store.clone(),
            h.queue.clone(),
            h.objects.clone(),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = zero_retention.purge_expired().await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.tasks_removed, 1);
        assert!(!h.objects.exists("raw/2024/01/01/f1.mp4").await.unwrap());
    }
}
