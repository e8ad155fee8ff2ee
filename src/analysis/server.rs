use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::db::{JobQueueDb, QueueHandle, RetryPolicy};
use super::hub::{DEFAULT_TOPIC_CAPACITY, NotificationHub};
use super::metrics::PipelineMetrics;
use super::pipeline::{WorkerPool, WorkerSettings};
use super::provider::HttpAnalysisProvider;
use super::ws;
use crate::config::AnalystConfig;

/// Build the full application router: JSON API plus the per-project
/// WebSocket feed.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .route("/ws/{project_id}", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the queue database, creating its parent directory if needed.
pub fn open_queue_db(config: &AnalystConfig) -> Result<JobQueueDb> {
    let db_path = &config.queue.db_path;
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    JobQueueDb::new(db_path)
        .with_context(|| format!("Failed to open queue database at {}", db_path.display()))
}

/// Run the API server and the worker pool until Ctrl+C.
pub async fn start_server(config: AnalystConfig) -> Result<()> {
    let db = open_queue_db(&config)?;
    let queue = QueueHandle::new(
        db,
        RetryPolicy {
            max_attempts: config.queue.max_attempts,
            backoff_base: config.queue.backoff_base(),
        },
    );
    let provider = Arc::new(
        HttpAnalysisProvider::new(&config.provider).context("Failed to build provider client")?,
    );
    let hub = NotificationHub::new(DEFAULT_TOPIC_CAPACITY);
    let metrics = Arc::new(PipelineMetrics::new());

    let pool = WorkerPool::new(
        queue.clone(),
        provider.clone(),
        hub.clone(),
        metrics.clone(),
        WorkerSettings::from_config(&config),
    );
    let workers = pool.start().await?;

    let state = Arc::new(AppState {
        queue,
        provider,
        hub: hub.clone(),
        metrics,
        concurrency: config.worker.concurrency,
    });
    let app = build_router(state, config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, provider = %config.provider.base_url, "Analysis relay listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    let requeued = workers.shutdown().await?;
    hub.close();
    info!(requeued, "Server shut down gracefully");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutting down");
        return;
    }
    info!("Shutting down...");
}
