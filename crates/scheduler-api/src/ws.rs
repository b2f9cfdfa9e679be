//! `/ws/jobs/{job_id}` and `/ws/workflows/{workflow_id}`: on connect, publish
//! the current snapshot once, then stream live updates. Incoming client
//! frames are read only to detect disconnects and keep the socket alive;
//! their content is ignored, per distilled-spec §6.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/jobs/:job_id", get(ws_job))
        .route("/ws/workflows/:workflow_id", get(ws_workflow))
        .with_state(state)
}

async fn ws_job(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_job_socket(socket, state, job_id))
}

async fn handle_job_socket(socket: WebSocket, state: AppState, job_id: Uuid) {
    let job = match state.store.get_job(job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "ws: job not found, closing");
            return;
        }
    };
    let (subscription, rx) = state.hub.subscribe_job(&job).await;
    stream_until_disconnect(socket, rx).await;
    state.hub.unsubscribe_job(job_id, subscription).await;
}

async fn ws_workflow(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_workflow_socket(socket, state, workflow_id))
}

async fn handle_workflow_socket(socket: WebSocket, state: AppState, workflow_id: Uuid) {
    let workflow = match state.store.get_workflow(workflow_id).await {
        Ok(workflow) => workflow,
        Err(e) => {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "ws: workflow not found, closing");
            return;
        }
    };
    let (subscription, rx) = state.hub.subscribe_workflow(&workflow).await;
    stream_until_disconnect(socket, rx).await;
    state.hub.unsubscribe_workflow(workflow_id, subscription).await;
}

/// Forwards every item from `rx` to `socket` as a JSON text frame, while
/// reading (and discarding) anything the client sends, until either side
/// closes. This is the single loop both job and workflow sockets share.
async fn stream_until_disconnect<T: Serialize>(
    mut socket: WebSocket,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<T>,
) {
    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some(update) => {
                        let body = serde_json::to_string(&update).unwrap_or_default();
                        if socket.send(Message::Text(body)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
