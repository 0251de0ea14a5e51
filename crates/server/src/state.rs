use std::sync::Arc;

use alphavid_core::{Config, ConversionService, SanitizedConfig, WorkerPool};

/// Shared application state
pub struct AppState {
    config: Config,
    service: Arc<ConversionService>,
    pool: Option<Arc<WorkerPool>>,
}

impl AppState {
    pub fn new(
        config: Config,
        service: Arc<ConversionService>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            config,
            service,
            pool,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &ConversionService {
        &self.service
    }

    /// The worker pool, if workers run in this process.
    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }
}
