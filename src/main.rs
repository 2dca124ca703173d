//! Shelfmark Engine
//!
//! Bookmark synchronization backend: community engagement, sharing and
//! collaboration, and the cross-device sync fabric.
//!
//! # Architecture
//!
//! - **Community**: behavior ingestion, metrics, trending, recommendations
//! - **Sharing**: share tokens, collaborators, forks, activity log
//! - **Sync**: durable events, offline queue, realtime WebSocket fan-out
//!
//! # Graceful Shutdown
//!
//! The engine handles SIGTERM and SIGINT signals, ensuring:
//! - In-flight requests complete
//! - Queued aggregation jobs drain
//! - Database connections are closed cleanly

use futures_util::future::select_all;
use shelfmark::api::{self, AppState};
use shelfmark::community;
use shelfmark::config::Config;
use shelfmark::database::{self, Database};
use shelfmark::error::Result;
use shelfmark::sync::Broker;
use shelfmark::{Cache, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with structured logging
    init_tracing();

    info!("═══════════════════════════════════════════════════════════════");
    info!("  Shelfmark Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════════════════════════");
    info!("  Components:");
    info!("    • Community Engagement Engine");
    info!("    • Sharing & Collaboration");
    info!("    • Cross-Device Sync Fabric");
    info!("═══════════════════════════════════════════════════════════════");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded and validated");

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize database connection pool
    let db = Database::new(&config.database).await?;
    info!("Database connection pool established");

    // Run migrations
    database::run_migrations(db.pool()).await?;
    info!("Database migrations applied");

    // In-process cache with its periodic sweeper
    let cache = Arc::new(Cache::new());
    let sweeper = shelfmark::cache::spawn_sweeper(
        cache.clone(),
        config.cache.sweep_interval,
        shutdown_tx.subscribe(),
    );
    info!("Cache initialized");

    // Worker pool wired to the community aggregators
    let job_pool = db.pool().clone();
    let job_cache = cache.clone();
    let workers = Arc::new(WorkerPool::start(
        config.worker.workers,
        config.worker.queue_capacity,
        move |job| {
            let pool = job_pool.clone();
            let cache = job_cache.clone();
            async move { community::dispatch_job(&pool, &cache, job).await }
        },
    ));

    // Realtime broker
    let broker = Arc::new(Broker::new(config.sync.session_buffer));

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db: db.clone(),
        cache,
        workers: workers.clone(),
        broker,
    });

    // Spawn API server
    info!("Starting API server on port {}...", config.api.port);
    let server = spawn_api_server(state, shutdown_tx.subscribe());

    info!("═══════════════════════════════════════════════════════════════");
    info!("  All services started successfully");
    info!("  API: http://{}:{}", config.api.host, config.api.port);
    info!(
        "  Health: http://{}:{}/health",
        config.api.host, config.api.port
    );
    info!("═══════════════════════════════════════════════════════════════");

    // Wait for shutdown signal or server exit
    let mut handles = vec![server, sweeper];
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
        _ = wait_for_any_failure(&mut handles) => {
            warn!("A service failed, initiating shutdown");
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, shutdown_services(handles))
        .await
        .is_err()
    {
        warn!("Shutdown timeout exceeded, forcing exit");
    }

    // Drain the worker queue, then release the pool
    workers.stop().await;
    db.close().await;

    info!("Shelfmark Engine stopped gracefully");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("shelfmark=debug,tower_http=debug,sqlx=warn,info")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .init();
}

/// Spawn the API server
fn spawn_api_server(
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = api::start_server(state) => {
                if let Err(e) = result {
                    error!("API server error: {:?}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("API server shutting down");
            }
        }
    })
}

/// Wait for any service task to exit
async fn wait_for_any_failure(handles: &mut [tokio::task::JoinHandle<()>]) {
    let _ = select_all(handles.iter_mut()).await;
}

/// Wait for all services to complete shutdown
async fn shutdown_services(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        // A handle already driven to completion by the failure watch must
        // not be polled again
        if !handle.is_finished() {
            let _ = handle.await;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
