//! End-to-end workflow dispatch: expands a workflow into jobs and runs them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Dag, Job, UserId, Workflow, WorkflowStatus, WorkflowUpdate};
use crate::error::{Result, SchedulerError};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::tenant::TenantManager;

/// Expands a submitted workflow into jobs and dispatches one branch task per
/// branch, gated by tenant admission. Mirrors this codebase's in-memory
/// runner: the driver is spawned as a background `tokio` task and tracked by
/// `run_id` (here, workflow id) purely for cancellation/observability; there
/// is no durability across process restarts.
#[derive(Clone)]
pub struct WorkflowDriver {
    store: Store,
    tenants: TenantManager,
    scheduler: Scheduler,
    handles: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl WorkflowDriver {
    pub fn new(store: Store, tenants: TenantManager, scheduler: Scheduler) -> Self {
        Self {
            store,
            tenants,
            scheduler,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persists the workflow and its jobs (all `PENDING`), then starts the
    /// driver task in the background and returns the workflow snapshot
    /// immediately; execution errors never propagate here, only through
    /// job/workflow status.
    pub async fn create_workflow(&self, user_id: UserId, name: String, dag: Dag) -> Result<Workflow> {
        if dag.is_empty() || dag.values().all(|jobs| jobs.is_empty()) || dag.values().any(|jobs| jobs.is_empty()) {
            return Err(SchedulerError::EmptyDag);
        }

        let total_jobs: u64 = dag.values().map(|jobs| jobs.len() as u64).sum();
        let branch_order: Vec<String> = dag.keys().cloned().collect();

        let workflow = Workflow {
            id: Uuid::now_v7(),
            user_id: user_id.clone(),
            name,
            branch_order,
            status: WorkflowStatus::Pending,
            total_jobs,
            completed_jobs: 0,
            failed_jobs: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let workflow = self.store.create_workflow(workflow).await;

        let mut branch_jobs: HashMap<String, Vec<Job>> = HashMap::new();
        for (branch_id, configs) in &dag {
            let mut jobs = Vec::with_capacity(configs.len());
            for config in configs {
                let job = Job::new(workflow.id, branch_id.clone(), user_id.clone(), config);
                let job = self.store.create_job(job).await;
                jobs.push(job);
            }
            branch_jobs.insert(branch_id.clone(), jobs);
        }

        self.spawn_driver_task(workflow.id, user_id, branch_jobs);

        Ok(workflow)
    }

    fn spawn_driver_task(&self, workflow_id: Uuid, user_id: UserId, branch_jobs: HashMap<String, Vec<Job>>) {
        let store = self.store.clone();
        let tenants = self.tenants.clone();
        let scheduler = self.scheduler.clone();
        let handles = self.handles.clone();

        let handle = tokio::spawn(async move {
            tenants.acquire_user_slot(&user_id).await;

            if let Err(e) = store
                .update_workflow(
                    workflow_id,
                    WorkflowUpdate {
                        status: Some(WorkflowStatus::Running),
                        started_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(workflow_id = %workflow_id, error = %e, "failed to mark workflow running");
            }

            let mut branch_tasks = Vec::with_capacity(branch_jobs.len());
            for (branch_id, jobs) in branch_jobs {
                let tenants = tenants.clone();
                let scheduler = scheduler.clone();
                let user_id = user_id.clone();
                branch_tasks.push(tokio::spawn(async move {
                    // Strictly FIFO: jobs within one branch are awaited in
                    // submission order, one at a time, by this single task.
                    for job in jobs {
                        tenants.register_job_start(&user_id).await;
                        let result = scheduler.schedule_job(job.id).await;
                        tenants.register_job_end(&user_id).await;
                        if let Err(e) = result {
                            warn!(job_id = %job.id, branch_id = %branch_id, error = %e, "schedule_job error");
                        }
                    }
                }));
            }
            for task in branch_tasks {
                let _ = task.await;
            }

            // The driver's own long-lived acquisition is released separately
            // from the per-job counts: by the time we get
            // here every branch task's per-job counts are already balanced,
            // so this call only matters if register_job_end above already
            // dropped the tenant's count to (and kept it at) zero.
            tenants.register_job_end(&user_id).await;

            handles.lock().await.remove(&workflow_id);
            info!(workflow_id = %workflow_id, "workflow driver finished");
        });

        let handles = self.handles.clone();
        tokio::spawn(async move {
            handles.lock().await.insert(workflow_id, handle);
        });
    }

    /// Cancels every `PENDING` job of `workflow_id`. Running jobs continue to
    /// completion. Returns the number of jobs cancelled.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<usize> {
        let jobs = self.store.list_workflow_jobs(workflow_id).await;
        let mut cancelled = 0;
        for job in jobs {
            if job.status == crate::domain::JobStatus::Pending && self.scheduler.cancel_job(job.id).await? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub async fn is_running(&self, workflow_id: Uuid) -> bool {
        self.handles.lock().await.contains_key(&workflow_id)
    }
}
