//! Processing of one delivered task.
//!
//! A delivery walks the task through its phases, renewing the lease with
//! each progress report:
//!
//! | progress | phase |
//! |---|---|
//! | 10 | claimed, input checked |
//! | 30 | input fetched from storage |
//! | 40 | engine started |
//! | 80 | engine finished |
//! | 95 | result stored |
//! | 100 | SUCCESS |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::converter::{ConversionJob, Converter};
use crate::metrics;
use crate::queue::TaskQueue;
use crate::storage::{processed_key, ObjectStore, StoredObject};
use crate::task::{Task, TaskMutation, TaskStore, TaskStoreError};

use super::config::WorkerConfig;
use super::types::{DeliveryOutcome, WorkerError};

/// Converts the tasks delivered to it, one at a time.
pub struct ConversionWorker {
    id: String,
    config: WorkerConfig,
    limits: LimitsConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
    converter: Arc<dyn Converter>,
}

impl ConversionWorker {
    pub fn new(
        id: impl Into<String>,
        config: WorkerConfig,
        limits: LimitsConfig,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            limits,
            store,
            queue,
            objects,
            converter,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Processes one delivered task ID to a terminal state or a scheduled retry.
    pub async fn process_delivery(&self, task_id: &str) -> DeliveryOutcome {
        let claim = TaskMutation::Claim {
            worker_id: self.id.clone(),
            lease_until: Utc::now() + self.config.lease(),
        };
        let task = match self.store.update(task_id, claim) {
            Ok(task) => task,
            Err(e) => {
                debug!(task_id = %task_id, worker = %self.id, error = %e, "Discarding delivery");
                return DeliveryOutcome::Discarded;
            }
        };

        info!(
            task_id = %task.id,
            file_id = %task.file_id,
            worker = %self.id,
            attempt = task.attempts,
            "Task claimed"
        );

        let started = Instant::now();
        let outcome = match self.run(&task).await {
            Ok(stored) => self.succeed(&task, stored),
            Err(e) => self.handle_failure(&task, e).await,
        };

        let result = match &outcome {
            DeliveryOutcome::Succeeded { .. } => "success",
            DeliveryOutcome::Retrying { .. } => "retry",
            DeliveryOutcome::Failed { code } => code.as_str(),
            DeliveryOutcome::Discarded => "discarded",
        };
        metrics::CONVERSION_DURATION
            .with_label_values(&[result])
            .observe(started.elapsed().as_secs_f64());

        outcome
    }

    async fn run(&self, task: &Task) -> Result<StoredObject, WorkerError> {
        self.progress(task, 10)?;

        let file = self
            .store
            .get_file(&task.file_id)?
            .ok_or_else(|| WorkerError::FileMissing(task.file_id.clone()))?;
        let extension = self
            .limits
            .check_file(&file.name, file.size_bytes, file.duration_secs)?;

        let work_dir = self.work_dir(task);
        tokio::fs::create_dir_all(&work_dir).await?;
        let result = self
            .transcode(task, &file.id, &file.storage_key, &extension, &work_dir)
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!(path = %work_dir.display(), error = %e, "Failed to clean work directory");
        }
        result
    }

    async fn transcode(
        &self,
        task: &Task,
        file_id: &str,
        storage_key: &str,
        extension: &str,
        work_dir: &std::path::Path,
    ) -> Result<StoredObject, WorkerError> {
        let input_path = work_dir.join(format!("input.{}", extension));
        let bytes = self.objects.get(storage_key, &input_path).await?;
        debug!(task_id = %task.id, bytes, "Input fetched");
        self.progress(task, 30)?;

        let job = ConversionJob {
            job_id: task.id.clone(),
            input_path,
            output_path: work_dir.join("output.webm"),
            filter_chain: task.filter_chain.clone(),
        };
        self.progress(task, 40)?;
        let result = self.converter.convert(job).await?;
        debug!(
            task_id = %task.id,
            duration_ms = result.duration_ms,
            size_bytes = result.output_size_bytes,
            "Engine finished"
        );
        self.progress(task, 80)?;

        let key = processed_key(file_id, &task.id, Utc::now());
        let stored = self.objects.put(&key, &result.output_path).await?;
        self.progress(task, 95)?;
        Ok(stored)
    }

    fn work_dir(&self, task: &Task) -> PathBuf {
        self.config
            .work_dir
            .join(&task.id)
            .join(format!("attempt-{}", task.attempts))
    }

    /// Reports progress and renews the lease.
    fn progress(&self, task: &Task, percent: u8) -> Result<(), WorkerError> {
        let mutation = TaskMutation::Progress {
            worker_id: self.id.clone(),
            percent,
            lease_until: Utc::now() + self.config.lease(),
        };
        match self.store.update(&task.id, mutation) {
            Ok(_) => Ok(()),
            Err(TaskStoreError::LeaseHeld { .. } | TaskStoreError::InvalidTransition { .. }) => {
                Err(WorkerError::LeaseLost(task.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn succeed(&self, task: &Task, stored: StoredObject) -> DeliveryOutcome {
        let mutation = TaskMutation::Succeed {
            worker_id: self.id.clone(),
            result_key: stored.key.clone(),
            result_url: stored.url.clone(),
        };
        match self.store.update(&task.id, mutation) {
            Ok(_) => {
                info!(task_id = %task.id, key = %stored.key, "Task succeeded");
                metrics::CONVERSIONS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                DeliveryOutcome::Succeeded {
                    result_url: stored.url,
                }
            }
            Err(e) => {
                // Lease lost after the upload: the next holder redoes the work.
                warn!(task_id = %task.id, error = %e, "Could not record success");
                DeliveryOutcome::Discarded
            }
        }
    }

    async fn handle_failure(&self, task: &Task, error: WorkerError) -> DeliveryOutcome {
        if let WorkerError::LeaseLost(_) = error {
            warn!(task_id = %task.id, worker = %self.id, "Lease lost, abandoning attempt");
            return DeliveryOutcome::Discarded;
        }

        let code = error.code();
        let message = error.to_string();

        if error.is_retryable() && task.attempts < self.config.max_attempts() {
            let delay = self.config.backoff_for(task.attempts);
            let redeliver_by = Utc::now()
                + chrono::Duration::milliseconds(delay.as_millis() as i64)
                + self.config.lease();
            let release = TaskMutation::Release {
                worker_id: Some(self.id.clone()),
                error: Some((code, message.clone())),
                redeliver_by,
            };
            if let Err(e) = self.store.update(&task.id, release) {
                warn!(task_id = %task.id, error = %e, "Could not release task for retry");
                return DeliveryOutcome::Discarded;
            }
            // The supervisor re-enqueues at `redeliver_by` if this is lost.
            if let Err(e) = self.queue.enqueue_after(&task.id, delay).await {
                warn!(task_id = %task.id, error = %e, "Could not schedule retry");
            }

            warn!(
                task_id = %task.id,
                attempt = task.attempts,
                code = %code,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Attempt failed, retrying"
            );
            metrics::RETRY_ATTEMPTS
                .with_label_values(&[code.as_str()])
                .inc();
            return DeliveryOutcome::Retrying {
                attempts: task.attempts,
                delay_ms: delay.as_millis() as u64,
            };
        }

        let fail = TaskMutation::Fail {
            worker_id: Some(self.id.clone()),
            code,
            message: message.clone(),
        };
        if let Err(e) = self.store.update(&task.id, fail) {
            warn!(task_id = %task.id, error = %e, "Could not record failure");
            return DeliveryOutcome::Discarded;
        }

        warn!(
            task_id = %task.id,
            attempt = task.attempts,
            code = %code,
            error = %message,
            "Task failed"
        );
        metrics::CONVERSIONS_TOTAL
            .with_label_values(&[code.as_str()])
            .inc();
        DeliveryOutcome::Failed { code }
    }
}
