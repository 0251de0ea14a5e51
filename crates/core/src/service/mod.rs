//! Request-side façade over the store, queue and object store.
//!
//! Everything a caller can ask for goes through [`ConversionService`]:
//! registering uploads, submitting conversions, and reading task status.
//! Submissions are validated as a whole before anything is written, so a
//! rejected request never leaves tasks behind.

mod error;
mod types;

pub use error::ServiceError;
pub use types::{
    result_file_name, BatchDownloadRequest, BatchStatusRequest, ConvertRequest,
    ConvertResponse, ResultLocation, TaskStatusView, UploadedFileView,
};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{LimitViolation, LimitsConfig};
use crate::converter::Converter;
use crate::error::ErrorCode;
use crate::filter::build_filter_chain;
use crate::metrics;
use crate::options::{ConvertOptionsRequest, OptionDefaults};
use crate::queue::TaskQueue;
use crate::storage::{raw_key, ObjectStore};
use crate::task::{NewUploadedFile, Task, TaskStatus, TaskStore, UploadedFile};

pub struct ConversionService {
    limits: LimitsConfig,
    defaults: OptionDefaults,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
    converter: Arc<dyn Converter>,
}

impl ConversionService {
    pub fn new(
        limits: LimitsConfig,
        defaults: OptionDefaults,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            limits,
            defaults,
            store,
            queue,
            objects,
            converter,
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Probes a received file and registers it.
    ///
    /// Container and size are checked before probing, so oversized or
    /// foreign files never reach the engine.
    pub async fn ingest(&self, name: &str, local_path: &Path) -> Result<UploadedFile, ServiceError> {
        let size_bytes = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| ServiceError::InvalidRequest(format!("{}: {}", name, e)))?
            .len();
        self.limits
            .check_file(name, size_bytes, 0.0)
            .map_err(|e| rejected(e.into()))?;

        let info = self
            .converter
            .probe(local_path)
            .await
            .map_err(|e| rejected(ServiceError::Probe(e)))?;
        if !info.has_video() {
            return Err(rejected(ServiceError::Limit(LimitViolation {
                code: ErrorCode::UnsupportedFormat,
                message: format!("{}: no video stream", name),
            })));
        }

        self.register_upload(name, size_bytes, info.duration_secs, local_path)
            .await
    }

    /// Validates an upload, stores the raw object and records the file.
    pub async fn register_upload(
        &self,
        name: &str,
        size_bytes: u64,
        duration_secs: f64,
        local_path: &Path,
    ) -> Result<UploadedFile, ServiceError> {
        let extension = self
            .limits
            .check_file(name, size_bytes, duration_secs)
            .map_err(|e| rejected(e.into()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let key = raw_key(&id, &extension, Utc::now());
        let stored = self.objects.put(&key, local_path).await?;

        let registered = self.store.register_file(NewUploadedFile {
            id: id.clone(),
            name: name.to_string(),
            size_bytes: stored.size_bytes,
            duration_secs,
            storage_key: key.clone(),
        });
        match registered {
            Ok(file) => {
                info!(file_id = %file.id, name = %name, size_bytes, duration_secs, "Upload registered");
                Ok(file)
            }
            Err(e) => {
                if let Err(cleanup) = self.objects.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
                }
                Err(e.into())
            }
        }
    }

    /// Creates one task per file. All IDs are validated before any task is
    /// created.
    pub async fn convert(
        &self,
        file_ids: &[String],
        options: &ConvertOptionsRequest,
    ) -> Result<ConvertResponse, ServiceError> {
        let options = self.validate_convert(file_ids, options).map_err(rejected)?;
        let chain = build_filter_chain(&options);

        let tasks = self
            .store
            .create_batch(file_ids, &options, &chain)
            .map_err(|e| rejected(e.into()))?;
        metrics::TASKS_CREATED.inc_by(tasks.len() as u64);

        let mut task_ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            // Tasks are durable; the supervisor's sweep re-enqueues a missed one.
            if let Err(e) = self.queue.enqueue(&task.id).await {
                warn!(task_id = %task.id, error = %e, "Failed to enqueue task");
            }
            debug!(task_id = %task.id, file_id = %task.file_id, "Task created");
            task_ids.push(task.id);
        }

        info!(tasks = task_ids.len(), filters = %chain.render(), "Conversion submitted");
        Ok(ConvertResponse { task_ids })
    }

    fn validate_convert(
        &self,
        file_ids: &[String],
        options: &ConvertOptionsRequest,
    ) -> Result<crate::options::ConvertOptions, ServiceError> {
        if file_ids.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "files must contain at least one file id".to_string(),
            ));
        }
        if file_ids.len() > self.limits.max_files_per_batch {
            return Err(ServiceError::TooManyFiles {
                count: file_ids.len(),
                max: self.limits.max_files_per_batch,
            });
        }
        let mut seen = HashSet::with_capacity(file_ids.len());
        if let Some(dup) = file_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(ServiceError::InvalidRequest(format!(
                "file id {} appears more than once",
                dup
            )));
        }

        let options = options.resolve(&self.defaults)?;

        for file_id in file_ids {
            let file = self
                .store
                .get_file(file_id)?
                .ok_or_else(|| ServiceError::FileNotFound(file_id.clone()))?;
            self.limits
                .check_file(&file.name, file.size_bytes, file.duration_secs)?;
        }

        Ok(options)
    }

    pub fn status(&self, task_id: &str) -> Result<TaskStatusView, ServiceError> {
        let task = self.store.get(task_id)?;
        Ok(TaskStatusView::from(&task))
    }

    /// Views for the known IDs, in request order. Unknown IDs are skipped.
    pub fn batch_status(&self, task_ids: &[String]) -> Result<Vec<TaskStatusView>, ServiceError> {
        let tasks = self.store.list(task_ids)?;
        Ok(tasks.iter().map(TaskStatusView::from).collect())
    }

    pub fn result_location(&self, task_id: &str) -> Result<ResultLocation, ServiceError> {
        let task = self.store.get(task_id)?;
        self.location_of(task)
    }

    fn location_of(&self, task: Task) -> Result<ResultLocation, ServiceError> {
        match (task.status, task.result_key, task.result_url) {
            (TaskStatus::Success, Some(key), Some(url)) => {
                let file_name = match self.store.get_file(&task.file_id)? {
                    Some(file) => result_file_name(&file.name),
                    None => result_file_name(&task.id),
                };
                Ok(ResultLocation {
                    task_id: task.id,
                    key,
                    url,
                    file_name,
                })
            }
            (status, _, _) => Err(ServiceError::ResultNotReady {
                task_id: task.id,
                status,
            }),
        }
    }

    /// Reads the result object of a finished task.
    pub async fn read_result(&self, task_id: &str) -> Result<(ResultLocation, Vec<u8>), ServiceError> {
        let location = self.result_location(task_id)?;
        let bytes = self.objects.read(&location.key).await?;
        Ok((location, bytes))
    }

    /// Reads the results of the finished tasks among `task_ids`, in request
    /// order, for archiving.
    ///
    /// Unknown and unfinished tasks are skipped, as are results that can no
    /// longer be read. File names are made unique within the batch. Fails
    /// with NOT_FOUND when nothing is left.
    pub async fn read_results(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<(ResultLocation, Vec<u8>)>, ServiceError> {
        if task_ids.is_empty() {
            return Err(rejected(ServiceError::InvalidRequest(
                "taskIds must contain at least one task id".to_string(),
            )));
        }
        if task_ids.len() > self.limits.max_files_per_batch {
            return Err(rejected(ServiceError::TooManyFiles {
                count: task_ids.len(),
                max: self.limits.max_files_per_batch,
            }));
        }

        let mut seen = HashSet::with_capacity(task_ids.len());
        let mut names = HashSet::with_capacity(task_ids.len());
        let mut results = Vec::new();
        for task in self.store.list(task_ids)? {
            if !seen.insert(task.id.clone()) {
                continue;
            }
            let Ok(mut location) = self.location_of(task) else {
                continue;
            };
            match self.objects.read(&location.key).await {
                Ok(bytes) => {
                    location.file_name = unique_name(&mut names, &location.file_name);
                    results.push((location, bytes));
                }
                Err(e) => {
                    warn!(task_id = %location.task_id, key = %location.key, error = %e, "Skipping unreadable result");
                }
            }
        }

        if results.is_empty() {
            return Err(ServiceError::NoResults {
                requested: task_ids.len(),
            });
        }
        debug!(requested = task_ids.len(), found = results.len(), "Results collected");
        Ok(results)
    }
}

/// Returns `name`, or `stem_N.ext` for the lowest free N from 2.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", name, n),
        };
        n += 1;
    }
    candidate
}

/// Counts a request rejected before any task was created.
fn rejected(error: ServiceError) -> ServiceError {
    metrics::REQUESTS_REJECTED
        .with_label_values(&[error.code().as_str()])
        .inc();
    debug!(code = %error.code(), error = %error, "Request rejected");
    error
}
