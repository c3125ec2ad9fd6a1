//! World Sync Server - authoritative multiplayer synchronization server
//!
//! This is the main entry point. It handles:
//! - WebSocket connections for real-time world synchronization
//! - The fixed-rate simulation engine (movement, snapshots, rooms)
//! - The health/status endpoint for operators and load tooling

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use world_sync_server::app::AppState;
use world_sync_server::config::Config;
use world_sync_server::game::metrics::{run_resource_sampler, Metrics};
use world_sync_server::game::{Engine, EngineCommand};
use world_sync_server::http::build_router;
use world_sync_server::util::time::init_server_time;
use world_sync_server::ws::conn::ConnectionTable;

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

    info!("Starting World Sync Server");
    info!("Server address: {}", config.server_addr);

    let connections = Arc::new(ConnectionTable::new());
    let metrics = Metrics::new();

    // Create and spawn the simulation engine
    let (engine, engine_handle, engine_rx) =
        Engine::new(config.sim, connections.clone(), metrics.clone());
    let engine_task = tokio::spawn(engine.run(engine_rx));

    // Resource sampler feeds the cpu/memory metrics
    tokio::spawn(run_resource_sampler(metrics.clone()));

    // Create application state and router
    let state = AppState::new(config.clone(), engine_handle.clone(), connections, metrics);
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the tick timer explicitly and wait for the engine to drain.
    let _ = engine_handle.send(EngineCommand::Shutdown).await;
    let _ = engine_task.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
