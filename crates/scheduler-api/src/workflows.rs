//! Workflow CRUD and cancellation routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use scheduler_core::{Dag, Job, Workflow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{forbidden, ApiError};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route("/workflows/:id", get(get_workflow).delete(cancel_workflow))
        .route("/workflows/:id/jobs", get(list_workflow_jobs))
        .with_state(state)
}

/// `POST /workflows` body: `{name, dag:{branches:{<branch_id>:[JobConfig...]}}}`.
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub dag: DagRequest,
}

#[derive(Debug, Deserialize)]
pub struct DagRequest {
    pub branches: Dag,
}

/// A workflow snapshot enriched with the aggregate progress a subscriber
/// would see: the arithmetic mean of its jobs' `progress_percent`.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub progress_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled_count: usize,
}

async fn to_response(state: &AppState, workflow: Workflow) -> WorkflowResponse {
    let progress = state.hub.workflow_progress(&workflow).await;
    WorkflowResponse {
        workflow,
        progress_percent: progress.progress_percent,
    }
}

pub async fn create_workflow(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = state
        .driver
        .create_workflow(user_id, req.name, req.dag.branches)
        .await?;
    let response = to_response(&state, workflow).await;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_workflows(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Json<Vec<WorkflowResponse>> {
    let workflows = state.store.list_user_workflows(&user_id).await;
    let mut responses = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        responses.push(to_response(&state, workflow).await);
    }
    Json(responses)
}

pub async fn get_workflow(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = state.store.get_workflow(id).await?;
    if workflow.user_id != user_id {
        return Err(forbidden(&user_id));
    }
    Ok(Json(to_response(&state, workflow).await))
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let workflow = state.store.get_workflow(id).await?;
    if workflow.user_id != user_id {
        return Err(forbidden(&user_id));
    }
    let cancelled_count = state.driver.cancel_workflow(id).await?;
    Ok(Json(CancelResponse { cancelled_count }))
}

pub async fn list_workflow_jobs(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let workflow = state.store.get_workflow(id).await?;
    if workflow.user_id != user_id {
        return Err(forbidden(&user_id));
    }
    Ok(Json(state.store.list_workflow_jobs(id).await))
}
