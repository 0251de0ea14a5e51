//! Task records and their durable store.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTaskStore;
pub use store::{TaskStore, TaskStoreError};
pub use types::{NewUploadedFile, PurgeReport, Task, TaskMutation, TaskStatus, UploadedFile};
