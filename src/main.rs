//! Plaza Server - shared-space sync server
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections carrying join/move/emote/interaction events
//! - The `/status` endpoint and optional static client assets
//! - The sync actor that owns all world state

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use plaza_server::app::AppState;
use plaza_server::config::Config;
use plaza_server::game::SyncService;
use plaza_server::http::build_router;
use plaza_server::init_tracing;
use plaza_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Plaza Server");
    info!("Server address: {}", config.server_addr);

    // Spawn the sync actor
    let (service, sync) = SyncService::new(config.sync_settings(), config.sweep_interval);
    tokio::spawn(service.run());

    // Create application state
    let state = AppState::new(config.clone(), sync);

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Status: http://{}/status", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);
    if let Some(dir) = &config.static_dir {
        info!("Serving client assets from {}", dir.display());
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
