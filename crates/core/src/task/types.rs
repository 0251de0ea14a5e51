//! Task and uploaded-file records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::TaskStoreError;
use crate::error::ErrorCode;
use crate::filter::FilterChain;
use crate::options::ConvertOptions;

/// Public status of a task.
///
/// Transitions only move forward: PENDING → RUNNING → SUCCESS | FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "RUNNING" => Some(TaskStatus::Running),
            "SUCCESS" => Some(TaskStatus::Success),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    /// Display name as uploaded.
    pub name: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    /// Object-store key of the raw bytes.
    pub storage_key: String,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedFile {
    /// Lowercase extension of the display name.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Request to register an upload whose bytes are already stored.
#[derive(Debug, Clone)]
pub struct NewUploadedFile {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub storage_key: String,
}

/// A conversion task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub file_id: String,
    pub options: ConvertOptions,
    pub filter_chain: FilterChain,
    pub status: TaskStatus,
    /// Percent complete, never decreasing.
    pub progress: u8,
    pub result_key: Option<String>,
    pub result_url: Option<String>,
    /// Last error. Only reported to clients once the task has FAILED.
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    /// Number of times the task has been claimed.
    pub attempts: u32,
    pub lease_owner: Option<String>,
    /// While owned, the lease deadline; while queued for another attempt,
    /// the deadline by which some worker must have claimed it.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An atomic change to a task, applied by [`TaskStore::update`](super::TaskStore::update).
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    /// Take the lease: PENDING → RUNNING, or re-claim a RUNNING task whose
    /// lease is free or lapsed. Counts as one attempt.
    Claim {
        worker_id: String,
        lease_until: DateTime<Utc>,
    },
    /// Heartbeat from the lease holder.
    Progress {
        worker_id: String,
        percent: u8,
        lease_until: DateTime<Utc>,
    },
    /// Give the lease up for another attempt; status stays RUNNING.
    ///
    /// `worker_id: None` is used by the supervisor and requires the lease
    /// to have lapsed.
    Release {
        worker_id: Option<String>,
        error: Option<(ErrorCode, String)>,
        redeliver_by: DateTime<Utc>,
    },
    Succeed {
        worker_id: String,
        result_key: String,
        result_url: String,
    },
    /// Terminal failure. `worker_id: None` requires a lapsed lease.
    Fail {
        worker_id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

impl TaskMutation {
    pub fn name(&self) -> &'static str {
        match self {
            TaskMutation::Claim { .. } => "claim",
            TaskMutation::Progress { .. } => "report progress on",
            TaskMutation::Release { .. } => "release",
            TaskMutation::Succeed { .. } => "complete",
            TaskMutation::Fail { .. } => "fail",
        }
    }
}

impl Task {
    /// Whether the lease deadline has passed (or there is none).
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.map_or(true, |deadline| deadline <= now)
    }

    /// Whether a worker may claim the task at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Running => self.lease_owner.is_none() || self.lease_lapsed(now),
            TaskStatus::Success | TaskStatus::Failed => false,
        }
    }

    /// Applies `mutation` in place, enforcing the transition rules.
    pub fn apply(&mut self, mutation: &TaskMutation, now: DateTime<Utc>) -> Result<(), TaskStoreError> {
        if self.status.is_terminal() {
            return Err(self.invalid(mutation));
        }

        match mutation {
            TaskMutation::Claim {
                worker_id,
                lease_until,
            } => {
                if !self.is_claimable(now) {
                    return Err(self.lease_held());
                }
                self.status = TaskStatus::Running;
                self.lease_owner = Some(worker_id.clone());
                self.lease_expires_at = Some(*lease_until);
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskMutation::Progress {
                worker_id,
                percent,
                lease_until,
            } => {
                self.require_running(mutation)?;
                self.require_holder(Some(worker_id), now)?;
                self.progress = self.progress.max((*percent).min(100));
                self.lease_expires_at = Some(*lease_until);
            }
            TaskMutation::Release {
                worker_id,
                error,
                redeliver_by,
            } => {
                self.require_running(mutation)?;
                self.require_holder(worker_id.as_deref(), now)?;
                self.lease_owner = None;
                self.lease_expires_at = Some(*redeliver_by);
                if let Some((code, message)) = error {
                    self.error_code = Some(*code);
                    self.error_message = Some(message.clone());
                }
            }
            TaskMutation::Succeed {
                worker_id,
                result_key,
                result_url,
            } => {
                self.require_running(mutation)?;
                self.require_holder(Some(worker_id), now)?;
                self.status = TaskStatus::Success;
                self.progress = 100;
                self.result_key = Some(result_key.clone());
                self.result_url = Some(result_url.clone());
                self.error_code = None;
                self.error_message = None;
                self.finish(now);
            }
            TaskMutation::Fail {
                worker_id,
                code,
                message,
            } => {
                self.require_running(mutation)?;
                self.require_holder(worker_id.as_deref(), now)?;
                self.status = TaskStatus::Failed;
                self.error_code = Some(*code);
                self.error_message = Some(message.clone());
                self.finish(now);
            }
        }

        self.updated_at = now;
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.completed_at = Some(now);
    }

    fn require_running(&self, mutation: &TaskMutation) -> Result<(), TaskStoreError> {
        if self.status == TaskStatus::Running {
            Ok(())
        } else {
            Err(self.invalid(mutation))
        }
    }

    fn require_holder(&self, worker_id: Option<&str>, now: DateTime<Utc>) -> Result<(), TaskStoreError> {
        let allowed = match worker_id {
            Some(worker) => self.lease_owner.as_deref() == Some(worker),
            None => self.lease_lapsed(now),
        };
        if allowed {
            Ok(())
        } else {
            Err(self.lease_held())
        }
    }

    fn invalid(&self, mutation: &TaskMutation) -> TaskStoreError {
        TaskStoreError::InvalidTransition {
            task_id: self.id.clone(),
            status: self.status,
            operation: mutation.name(),
        }
    }

    fn lease_held(&self) -> TaskStoreError {
        TaskStoreError::LeaseHeld {
            task_id: self.id.clone(),
        }
    }
}

/// Outcome of a retention purge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeReport {
    pub files_removed: usize,
    pub tasks_removed: usize,
    /// Raw and result objects that belonged to the purged records.
    pub storage_keys: Vec<String>,
}
