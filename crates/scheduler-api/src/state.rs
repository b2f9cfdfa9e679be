//! Shared application state, wired once in `main` and cloned into each
//! route module — mirrors this workspace's `AppState { db: Arc<Database> }`
//! pattern, just with the scheduler's components instead of a database handle.

use scheduler_core::{ProgressHub, Scheduler, Store, TenantManager, WorkflowDriver};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub tenants: TenantManager,
    pub scheduler: Scheduler,
    pub driver: WorkflowDriver,
    pub hub: ProgressHub,
}
