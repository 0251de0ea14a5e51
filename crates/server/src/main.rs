use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alphavid_core::config::{LogFormat, LoggingConfig, CONFIG_PATH_ENV};
use alphavid_core::converter::{Converter, FfmpegConverter};
use alphavid_core::queue::{MemoryTaskQueue, TaskQueue};
use alphavid_core::storage::{LocalObjectStore, ObjectStore};
use alphavid_core::{
    load_config, validate_config, ConversionService, SqliteTaskStore, Supervisor, TaskStore,
    WorkerPool,
};

use alphavid_server::api::create_router;
use alphavid_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config.logging);
    info!("Loaded configuration from {:?}", config_path);

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Database path: {:?}", config.database.path);
    info!("Storage root: {:?}", config.storage.root);

    let retention = chrono::Duration::hours(config.storage.retention_hours as i64);

    // Create SQLite task store
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::new(&config.database.path)
            .context("Failed to create task store")?
            .with_retention(retention),
    );
    info!("Task store initialized");

    let queue: Arc<dyn TaskQueue> = Arc::new(MemoryTaskQueue::new());

    tokio::fs::create_dir_all(&config.storage.root)
        .await
        .with_context(|| format!("Failed to create storage root {:?}", config.storage.root))?;
    let objects: Arc<dyn ObjectStore> = Arc::new(
        LocalObjectStore::new(config.storage.root.clone())
            .with_public_base_url(config.storage.public_base_url.clone()),
    );

    let converter: Arc<dyn Converter> =
        Arc::new(FfmpegConverter::new(config.converter.clone()));
    if let Err(e) = converter.validate().await {
        // Uploads and conversions fail with ENGINE_FAILED until ffmpeg is available.
        warn!(error = %e, "Conversion engine is not usable");
    } else {
        info!("Using converter: {}", converter.name());
    }

    let service = Arc::new(ConversionService::new(
        config.limits.clone(),
        config.defaults.clone(),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&objects),
        Arc::clone(&converter),
    ));

    // Workers
    let pool = if config.worker.enabled {
        let pool = Arc::new(WorkerPool::new(
            config.worker.clone(),
            config.limits.clone(),
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&objects),
            Arc::clone(&converter),
        ));
        pool.start().await;
        info!(concurrency = config.worker.concurrency, "Worker pool started");
        Some(pool)
    } else {
        info!("Workers disabled in config");
        None
    };

    let supervisor = Supervisor::new(
        config.worker.clone(),
        config.storage.retention_hours,
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&objects),
    );
    supervisor.start().await;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), service, pool.clone()));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    supervisor.stop().await;
    if let Some(ref pool) = pool {
        info!("Stopping worker pool...");
        pool.stop().await;
        info!("Worker pool stopped");
    }
    queue.close().await;

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
