//! Hand-off of task IDs from the request side to workers.
//!
//! Delivery is at-least-once: the queue may hand out an ID whose task is
//! already finished or leased, and the worker's claim discards it.

mod memory;

pub use memory::MemoryTaskQueue;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorCode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}

impl QueueError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageError
    }
}

/// An ordered queue of task IDs.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Adds an ID. Returns `false` if it was already waiting.
    async fn enqueue(&self, task_id: &str) -> Result<bool, QueueError>;

    /// Adds an ID once `delay` has elapsed.
    async fn enqueue_after(&self, task_id: &str, delay: Duration) -> Result<(), QueueError>;

    /// Waits for the next ID. Returns `None` once the queue is closed.
    async fn dequeue(&self) -> Option<String>;

    /// Number of IDs waiting.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops accepting IDs and wakes all waiting consumers.
    async fn close(&self);
}
