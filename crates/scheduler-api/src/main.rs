// Workflow scheduler API server

mod auth;
mod config;
mod error;
mod jobs;
mod state;
mod status;
mod workflows;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use scheduler_core::{ExecutorAdapter, ProgressHub, Scheduler, SchedulerConfig, Store, TenantManager, WorkflowDriver};
use scheduler_executor::{SimulatedExecutor, SimulatedExecutorConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ApiConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scheduler_api=info,scheduler_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_config = ApiConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();
    tracing::info!(
        app_name = %api_config.app_name,
        max_workers = scheduler_config.max_workers,
        max_active_users = scheduler_config.max_active_users,
        "{} starting",
        api_config.app_name
    );

    let store = Store::new();
    let hub = ProgressHub::new(store.clone());
    let executor = Arc::new(SimulatedExecutor::new(SimulatedExecutorConfig::from_env()));
    let adapter = ExecutorAdapter::new(executor, store.clone(), hub.clone());
    let scheduler = Scheduler::new(scheduler_config.max_workers, store.clone(), hub.clone(), adapter);
    let tenants = TenantManager::new(scheduler_config.max_active_users, store.clone());
    let driver = WorkflowDriver::new(store.clone(), tenants.clone(), scheduler.clone());

    let app_state = AppState {
        store,
        tenants,
        scheduler,
        driver,
        hub,
    };

    let api_routes = Router::new()
        .merge(workflows::routes(app_state.clone()))
        .merge(jobs::routes(app_state.clone()))
        .merge(status::routes(app_state.clone()))
        .merge(ws::routes(app_state));

    let app = if api_config.api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(&api_config.api_prefix, api_routes)
    }
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http());

    let addr = api_config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
