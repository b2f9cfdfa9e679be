//! Maps `scheduler_core::SchedulerError` (and transport-only failures) onto
//! the HTTP status codes the distilled spec assigns in §6/§7: 404 for missing
//! resources, 403 for owner mismatch, 400 for an invalid status transition or
//! empty DAG, 500 for anything recovered from an executor or internal failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scheduler_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] SchedulerError),

    #[error("the X-User-ID header is required")]
    MissingUser,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Core(SchedulerError::WorkflowNotFound(_) | SchedulerError::JobNotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Core(SchedulerError::Forbidden { .. }) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Core(SchedulerError::InvalidTransition { .. } | SchedulerError::EmptyDag) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Core(SchedulerError::ExecutorFailure(_) | SchedulerError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::MissingUser => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Raised by an owner-scoped handler when the caller's `X-User-ID` does not
/// match the resource's `user_id`. This is the sole constructor of
/// `SchedulerError::Forbidden`: the core itself never raises it, since
/// ownership is a transport-layer policy, not something `scheduler-core`
/// checks on its own.
pub fn forbidden(caller: &str) -> ApiError {
    ApiError::Core(SchedulerError::Forbidden {
        caller: caller.to_string(),
    })
}
