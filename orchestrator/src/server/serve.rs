//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::StackError;
use crate::server::handlers::{
    apply_handler, health_handler, preview_handler, recent_runs_handler, run_events_handler,
    run_handler, setup_verify_handler, validate_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Validation and change impact
        .route("/api/validate", post(validate_handler))
        .route("/api/setup/verify", post(setup_verify_handler))
        .route("/api/preview", post(preview_handler))
        // Runs
        .route("/api/apply", post(apply_handler))
        .route("/api/runs/recent", get(recent_runs_handler))
        .route("/api/runs/{run_id}", get(run_handler))
        .route("/api/runs/{run_id}/events", get(run_events_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), StackError>>, StackError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| StackError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| StackError::ServerError(e.to_string()))
    });

    Ok(handle)
}
