//! Cache Index - demo cache server
//!
//! Serves an in-memory cache through the cache manager over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_index::api::create_router;
use cache_index::cache::MemoryClient;
use cache_index::{AppState, Config};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create and connect the cache manager (starts the index loops)
/// 4. Create Axum router with all endpoints
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM, stop serving and close the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_index=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cache server");

    let config = Config::from_env();
    let index = &config.cache.index;
    info!(
        "Configuration loaded: cache={}, provider={}, use_cache_index={}, reap_interval={:?}, flush_interval={:?}, max_size_bytes={}, max_size_objects={}, port={}",
        config.cache.name,
        config.cache.provider,
        config.cache.use_cache_index,
        index.reap_interval,
        index.flush_interval,
        index.max_size_bytes,
        index.max_size_objects,
        config.server_port
    );

    let state = AppState::from_config(&config, Arc::new(MemoryClient::new()));
    state.cache.connect().await?;
    info!("Cache connected");

    let cache = state.cache.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No traffic is admitted any more, so closing can't race a request
    if let Err(err) = cache.close().await {
        error!("Failed to close cache: {}", err);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
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
}
