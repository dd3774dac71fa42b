//! Tracklog API Server
//!
//! This crate provides the HTTP server hosting the tracked word operations
//! and the audit search.
//!
//! # Architecture
//!
//! The API server is built on Axum and Tokio:
//! - `POST /words/reverse` and `POST /words/search`, each wrapped by the
//!   tracking middleware
//! - `GET /health`
//! - The audit pipeline (publisher worker and persistence consumer) started
//!   alongside the server
//!
//! # Example
//!
//! ```no_run
//! use api::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod db;
mod pipeline;
pub mod routes;
mod state;
pub mod tracking;

pub use config::{ChannelKind, Config, StoreKind};
pub use pipeline::Pipeline;
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Runs the Tracklog API server.
///
/// This function initializes the server with configuration from environment variables
/// and starts listening for incoming connections. It handles graceful shutdown on
/// SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - The audit pipeline cannot be started
/// - The server fails to bind to the configured address
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the Tracklog API server with the provided configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The audit pipeline cannot be started
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr();

    tracing::info!(
        host = %config.host,
        port = %config.port,
        channel = ?config.channel,
        store = ?config.store,
        topic = %config.pipeline.topic,
        "Tracklog API server starting"
    );

    let pipeline = Pipeline::from_config(&config).await?;
    let app = create_router(pipeline.state());
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline
        .shutdown(config.pipeline.publish_timeout() + Duration::from_secs(1))
        .await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the main application router with all routes and middleware.
///
/// Request size is capped by the tracking middleware on each tracked route,
/// so oversized calls are still captured.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::words_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
