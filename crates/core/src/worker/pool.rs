//! Pool of worker loops sharing one queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::converter::Converter;
use crate::queue::TaskQueue;
use crate::storage::ObjectStore;
use crate::task::TaskStore;

use super::config::WorkerConfig;
use super::runner::ConversionWorker;
use super::types::{DeliveryOutcome, WorkerPoolStatus};

/// How long `stop` waits for in-flight deliveries.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct PoolStats {
    active: AtomicU64,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl PoolStats {
    fn record(&self, outcome: &DeliveryOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            DeliveryOutcome::Succeeded { .. } => &self.succeeded,
            DeliveryOutcome::Failed { .. } => &self.failed,
            DeliveryOutcome::Retrying { .. } => &self.retried,
            DeliveryOutcome::Discarded => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs `concurrency` conversion workers until stopped.
pub struct WorkerPool {
    workers: Vec<Arc<ConversionWorker>>,
    queue: Arc<dyn TaskQueue>,
    running: Arc<AtomicBool>,
    stats: Arc<PoolStats>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        limits: LimitsConfig,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        // Lease owners carry a per-process prefix so a restarted pool never
        // matches the leases of its predecessor.
        let instance = uuid::Uuid::new_v4().simple().to_string();
        let instance = &instance[..8];

        let workers = (0..config.concurrency.max(1))
            .map(|n| {
                Arc::new(ConversionWorker::new(
                    format!("worker-{}-{}", instance, n),
                    config.clone(),
                    limits.clone(),
                    Arc::clone(&store),
                    Arc::clone(&queue),
                    Arc::clone(&objects),
                    Arc::clone(&converter),
                ))
            })
            .collect();

        Self {
            workers,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PoolStats::default()),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the pool (spawns one loop per worker).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        info!(workers = self.workers.len(), "Starting worker pool");

        let mut handles = self.handles.lock().await;
        for worker in &self.workers {
            handles.push(self.spawn_worker_loop(Arc::clone(worker)));
        }
    }

    /// Stop the pool, letting in-flight deliveries finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }

        info!("Stopping worker pool");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        if tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Worker pool did not drain in time; leases will be swept");
        }

        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> WorkerPoolStatus {
        WorkerPoolStatus {
            running: self.is_running(),
            workers: self.workers.len(),
            active: self.stats.active.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            queued: self.queue.len().await,
        }
    }

    fn spawn_worker_loop(&self, worker: Arc<ConversionWorker>) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker = %worker.id(), "Worker loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker = %worker.id(), "Worker loop received shutdown signal");
                        break;
                    }
                    next = queue.dequeue() => {
                        let Some(task_id) = next else {
                            debug!(worker = %worker.id(), "Queue closed");
                            break;
                        };
                        stats.active.fetch_add(1, Ordering::Relaxed);
                        let outcome = worker.process_delivery(&task_id).await;
                        stats.active.fetch_sub(1, Ordering::Relaxed);
                        stats.record(&outcome);
                    }
                }
            }
            debug!(worker = %worker.id(), "Worker loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::build_filter_chain;
    use crate::options::OptionDefaults;
    use crate::queue::MemoryTaskQueue;
    use crate::storage::LocalObjectStore;
    use crate::task::{NewUploadedFile, SqliteTaskStore, TaskStatus};
    use crate::testing::MockConverter;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pool_processes_queued_tasks() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let queue = Arc::new(MemoryTaskQueue::new());
        let objects = Arc::new(LocalObjectStore::new(dir.path().join("objects")));
        let converter = Arc::new(MockConverter::new());

        let raw = dir.path().join("upload.mp4");
        tokio::fs::write(&raw, b"raw").await.unwrap();
        let options = OptionDefaults::default().to_options().unwrap();
        let chain = build_filter_chain(&options);

        let mut task_ids = Vec::new();
        for n in 0..4 {
            let file_id = format!("f{}", n);
            let key = format!("raw/2024/01/01/{}.mp4", file_id);
            objects.put(&key, &raw).await.unwrap();
            store
                .register_file(NewUploadedFile {
                    id: file_id.clone(),
                    name: "a.mp4".to_string(),
                    size_bytes: 3,
                    duration_secs: 9.8,
                    storage_key: key,
                })
                .unwrap();
            let task = store.create(&file_id, &options, &chain).unwrap();
            queue.enqueue(&task.id).await.unwrap();
            task_ids.push(task.id);
        }

        let pool = WorkerPool::new(
            WorkerConfig::default()
                .with_concurrency(2)
                .with_work_dir(dir.path().join("work")),
            LimitsConfig::default(),
            store.clone(),
            queue.clone(),
            objects,
            converter.clone(),
        );
        pool.start().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.status().await.succeeded < 4 {
            assert!(tokio::time::Instant::now() < deadline, "tasks did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let tasks = store.list(&task_ids).unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Success));
        let status = pool.status().await;
        assert!(status.running);
        assert_eq!(status.workers, 2);
        assert_eq!(status.failed, 0);

        pool.stop().await;
        assert!(!pool.status().await.running);
        assert_eq!(converter.conversion_count().await, 4);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let pool = WorkerPool::new(
            WorkerConfig::default(),
            LimitsConfig::default(),
            Arc::new(SqliteTaskStore::in_memory().unwrap()),
            Arc::new(MemoryTaskQueue::new()),
            Arc::new(LocalObjectStore::new(dir.path())),
            Arc::new(MockConverter::new()),
        );
        pool.stop().await;
        assert!(!pool.is_running());
    }
}
