//! Origin Storage - A per-origin write-back key-value cache server
//!
//! Serves per-origin key-value storage over HTTP, backed by an append-only
//! log file or an in-memory store.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use origin_storage::api::{create_router, AppState};
use origin_storage::{spawn_purge_task, Config};

/// Main entry point for the storage server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the backing store and create the wrapper registry
/// 4. Start background memory purge task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. On SIGINT/SIGTERM, flush every origin before exiting
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "origin_storage=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Origin Storage Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_size={}, commit_delay={}s, max_commits_per_hour={}, aggressive_flushing={}, port={}",
        config.max_size,
        config.commit_delay,
        config.max_commits_per_hour,
        config.aggressive_flushing,
        config.server_port
    );

    let state = AppState::from_config(&config).context("failed to open backing store")?;
    info!("Storage registry initialized");

    let purge_handle = spawn_purge_task(state.registry.clone(), config.purge_interval);
    info!("Background purge task started");

    let app = create_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(purge_handle))
        .await
        .context("server error")?;

    // Commit asynchronously first so dropping the bindings has nothing left to flush
    let closed = state.registry.shutdown().await;
    let released = state.close_all();
    info!(
        "Server shutdown complete: {} origins flushed, {} bindings released",
        closed, released
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the purge task and allows graceful shutdown.
async fn shutdown_signal(purge_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    purge_handle.abort();
    warn!("Purge task aborted");
}
