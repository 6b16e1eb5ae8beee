//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use openapi_server::{
    ApplyResponse, HealthResponse, Preview, RecentRunsQuery, RecentRunsResponse, RunView,
    SetupVerifyRequest, SetupVerifyResponse, ValidateResponse, VersionResponse,
};
use serde_json::Value;
use tracing::debug;

use crate::server::errors::ApiResult;
use crate::server::state::ServerState;
use crate::utils::version_info;
use crate::validation::ValidateOptions;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "arrstack".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// `POST /api/validate`
pub async fn validate_handler(
    State(state): State<Arc<ServerState>>,
    Json(config): Json<Value>,
) -> Json<ValidateResponse> {
    Json(state.orchestrator.validate_simple(&config).await)
}

/// `POST /api/setup/verify`
pub async fn setup_verify_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SetupVerifyRequest>,
) -> Json<SetupVerifyResponse> {
    let options = ValidateOptions {
        partial: request.partial,
        skip_service_checks: request.skip_service_checks,
    };
    Json(state.orchestrator.setup_verify(&request.config, options).await)
}

/// `POST /api/preview`
pub async fn preview_handler(
    State(state): State<Arc<ServerState>>,
    Json(candidate): Json<Value>,
) -> Json<Preview> {
    Json(state.orchestrator.preview(&candidate).await)
}

/// `POST /api/apply`: returns once the run is registered
pub async fn apply_handler(
    State(state): State<Arc<ServerState>>,
    Json(config): Json<Value>,
) -> ApiResult<Json<ApplyResponse>> {
    let run_id = state.orchestrator.apply(config).await?;
    Ok(Json(ApplyResponse {
        ok: true,
        run_id: Some(run_id),
        events: Vec::new(),
        errors: Vec::new(),
    }))
}

/// `GET /api/runs/recent`
pub async fn recent_runs_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RecentRunsQuery>,
) -> Json<RecentRunsResponse> {
    Json(state.orchestrator.recent_runs(query.limit))
}

/// `GET /api/runs/{run_id}`
pub async fn run_handler(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunView>> {
    Ok(Json(state.orchestrator.get_run(&run_id)?))
}

/// `GET /api/runs/{run_id}/events`: backlog, live events, then the
/// terminal `status` event and close
pub async fn run_events_handler(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state.orchestrator.subscribe(&run_id)?;
    debug!("Event stream opened for run {}", run_id);

    let stream = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse_event = Event::default().event(event.name()).data(event.data_json());
        Some((Ok(sse_event), rx))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
