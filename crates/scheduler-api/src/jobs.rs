//! Job lookup and cancellation routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use scheduler_core::Job;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{forbidden, ApiError};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .with_state(state)
}

pub async fn get_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.store.get_job(id).await?;
    if job.user_id != user_id {
        return Err(forbidden(&user_id));
    }
    Ok(Json(job))
}

/// `POST /jobs/{id}/cancel`: 200 on success, 400 if the job was not PENDING.
pub async fn cancel_job(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let job = state.store.get_job(id).await?;
    if job.user_id != user_id {
        return Err(forbidden(&user_id));
    }
    let cancelled = state.scheduler.cancel_job(id).await?;
    Ok(if cancelled {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    })
}
