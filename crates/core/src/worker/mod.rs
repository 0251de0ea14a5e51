//! Background conversion processing.
//!
//! - **Workers**: `concurrency` loops pull task IDs from the queue, claim the
//!   task's lease and run it to a terminal state or a scheduled retry.
//! - **Supervisor**: re-enqueues claimable tasks on startup, requeues tasks
//!   whose lease expired, and purges files past retention.

mod config;
mod pool;
mod runner;
mod supervisor;
mod types;

pub use config::WorkerConfig;
pub use pool::WorkerPool;
pub use runner::ConversionWorker;
pub use supervisor::{SweepReport, Supervisor};
pub use types::{DeliveryOutcome, WorkerError, WorkerPoolStatus};
