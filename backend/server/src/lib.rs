//! Backend for a student/course management platform.
//!
//!
//!
//! # General Infrastructure
//! - Single axum server, JSON in and out
//! - A browser frontend talks to it directly, so CORS is open to any origin
//! - State is built once at startup and shared behind an `Arc`
//! - The persistence backend is picked by configuration, never by a global
//!
//!
//!
//! # Data
//!
//! Students, courses, and enrollments. See [`models`] for the records and [`enrollment`] for
//! how the relation between students and courses is kept consistent.
//!
//! ## Redis vs Memory
//! Redis is the production store. The memory store keeps everything in the process and is
//! what the test suite runs on. Both implement [`store::Store`], so handlers cannot tell them
//! apart.
//!
//!
//!
//! # Setup
//!
//! Environment
//! - `RUST_PORT`: listen port, default `1111`
//! - `STORAGE_BACKEND`: `memory` or `redis`, default `memory`
//! - `REDIS_URL`: default `redis://127.0.0.1:6379`
//! - `RUST_LOG`: tracing filter, e.g. `registrar=debug,tower_http=info`
//!
//! Run against Redis.
//! ```sh
//! STORAGE_BACKEND=redis RUST_LOG=info cargo run -p registrar
//! ```
//!
//! Smoke test a running server.
//! ```sh
//! cargo run -p registrar-tester -- --base-url http://localhost:1111
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
};

#[cfg(unix)]
use signal::unix::{SignalKind, signal};
use signal::ctrl_c;
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod enrollment;
pub mod error;
pub mod memory;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

use config::Config;
use error::AppError;
use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load().map_err(|e| AppError::Internal(e.to_string()))?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind {address}: {e}")))?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
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
