pub mod config;
pub mod converter;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod options;
pub mod queue;
pub mod service;
pub mod storage;
pub mod task;
pub mod testing;
pub mod worker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use error::ErrorCode;
pub use service::{ConversionService, ServiceError, TaskStatusView};
pub use task::{SqliteTaskStore, Task, TaskStatus, TaskStore};
pub use worker::{Supervisor, WorkerPool};
