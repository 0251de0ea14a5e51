use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use super::{conversions, handlers, middleware::metrics_middleware};
use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file bytes.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let limits = state.service().limits();
    // Per-file size is enforced while streaming; this caps the whole upload.
    let upload_limit = (limits.max_file_size_bytes() as usize)
        .saturating_mul(limits.max_files_per_batch.max(1))
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let upload_routes = Router::new()
        .route("/upload", post(conversions::upload))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit));

    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Conversions
        .route("/convert", post(conversions::convert))
        .route("/status", get(conversions::get_status))
        .route("/status/batch", post(conversions::batch_status))
        .route("/download", get(conversions::download))
        .route("/batch-download", post(conversions::batch_download))
        .merge(upload_routes)
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
