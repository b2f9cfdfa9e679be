//! `/health` and `/status` — liveness and scheduler/tenant observability.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use scheduler_core::{SchedulerStatus, TenantStatus};
use serde::Serialize;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scheduler: SchedulerStatus,
    pub tenants: TenantStatus,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        scheduler: state.scheduler.status().await,
        tenants: state.tenants.status().await,
    })
}
