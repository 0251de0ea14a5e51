//! In-process task queue.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{QueueError, TaskQueue};

#[derive(Default)]
struct QueueState {
    items: VecDeque<String>,
    waiting: HashSet<String>,
    closed: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// FIFO queue held in memory, shared by cloning.
///
/// Contents are lost on restart; the supervisor rebuilds them from the
/// task store on startup.
#[derive(Clone)]
pub struct MemoryTaskQueue {
    inner: Arc<Inner>,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    async fn push(inner: &Inner, task_id: &str) -> Result<bool, QueueError> {
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if !state.waiting.insert(task_id.to_string()) {
            return Ok(false);
        }
        state.items.push_back(task_id.to_string());
        drop(state);

        inner.notify.notify_one();
        Ok(true)
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task_id: &str) -> Result<bool, QueueError> {
        Self::push(&self.inner, task_id).await
    }

    async fn enqueue_after(&self, task_id: &str, delay: Duration) -> Result<(), QueueError> {
        if self.inner.state.lock().await.closed {
            return Err(QueueError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = Self::push(&inner, &task_id).await {
                debug!(task_id = %task_id, error = %e, "Delayed enqueue dropped");
            }
        });
        Ok(())
    }

    async fn dequeue(&self) -> Option<String> {
        loop {
            // Registered before checking so a concurrent push cannot be missed.
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock().await;
                if let Some(task_id) = state.items.pop_front() {
                    state.waiting.remove(&task_id);
                    return Some(task_id);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn len(&self) -> usize {
        self.inner.state.lock().await.items.len()
    }

    async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryTaskQueue::new();
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.dequeue().await.as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("b"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_waiting() {
        let queue = MemoryTaskQueue::new();
        assert!(queue.enqueue("a").await.unwrap());
        assert!(!queue.enqueue("a").await.unwrap());
        assert_eq!(queue.len().await, 1);

        queue.dequeue().await.unwrap();
        // once handed out it may be queued again
        assert!(queue.enqueue("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = MemoryTaskQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("late").await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_close_wakes_consumers() {
        let queue = MemoryTaskQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close().await;

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(queue.enqueue("x").await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_enqueue_after_delays_delivery() {
        let queue = MemoryTaskQueue::new();
        queue
            .enqueue_after("later", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(queue.is_empty().await);

        let got = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("later"));
    }
}
