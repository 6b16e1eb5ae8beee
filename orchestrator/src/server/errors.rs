//! Mapping of orchestrator errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::{ApplyResponse, ErrorResponse};
use tracing::error;

use crate::errors::StackError;

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError(pub StackError);

impl From<StackError> for ApiError {
    fn from(err: StackError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            // Rejected before a run exists: same body shape as an accepted apply
            StackError::Validation(report) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApplyResponse {
                    ok: false,
                    run_id: None,
                    events: Vec::new(),
                    errors: report.errors,
                }),
            )
                .into_response(),
            StackError::Conflict { target, run_id } => (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "conflict".to_string(),
                    message: format!("A run is already in progress for target '{}'", target),
                    details: Some(serde_json::json!({ "run_id": run_id })),
                }),
            )
                .into_response(),
            StackError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "not_found".to_string(),
                    message: format!("{} not found", what),
                    details: None,
                }),
            )
                .into_response(),
            other => {
                error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "internal".to_string(),
                        message: other.to_string(),
                        details: None,
                    }),
                )
                    .into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
