//! Content service for content-sync.
//!
//! This server:
//! - Stores articles, events and recordings authoritatively in memory
//! - Serves them over HTTP in the `{ success, data, message }` envelope
//! - Caches GET responses per resource TTL and purges a resource on every write
//! - Exposes cache statistics and manual purging under /admin/cache

use clap::Parser;
use content_sync_server::{router, AppState, Config, ResponseCache};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let policy = config.cache_policy();

    info!("Starting content-sync-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!(
        "  Cache TTL: articles {}s, events {}s, recordings {}s",
        policy.article_ttl.as_secs(),
        policy.event_ttl.as_secs(),
        policy.recording_ttl.as_secs()
    );
    info!("  Cache capacity: {} responses", policy.max_entries);

    let state = AppState::with_cache(ResponseCache::new(policy));
    let app = router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
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
