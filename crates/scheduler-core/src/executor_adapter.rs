//! `JobExecutor` contract and the adapter that wires it to the `Store` and
//! `ProgressHub`. The real image-processing pipeline
//! (tiling, tissue filtering, segmentation, mask generation) is out of scope
//! and lives behind this trait in another crate (`scheduler-executor`).

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::JobUpdate;
use crate::progress::ProgressHub;
use crate::store::Store;

/// Handle an executor uses to report progress and its terminal outcome.
/// Every mutation goes through the `Store` so the rest of the system only
/// ever observes job state through it, then is fanned out via `ProgressHub`.
#[derive(Clone)]
pub struct ExecutionContext {
    store: Store,
    hub: ProgressHub,
    job_id: Uuid,
}

impl ExecutionContext {
    pub fn new(store: Store, hub: ProgressHub, job_id: Uuid) -> Self {
        Self { store, hub, job_id }
    }

    /// Records incremental progress and notifies job subscribers. Callers
    /// should call this at whatever cadence the pipeline naturally produces
    /// progress (per tile, per batch, ...); there is no intrinsic throttling
    /// here; `ProgressHub` delivery is cheap and non-blocking.
    pub async fn report_progress(
        &self,
        progress_percent: f64,
        tiles_processed: u64,
        tiles_total: u64,
    ) -> anyhow::Result<()> {
        let job = self
            .store
            .update_job(
                self.job_id,
                JobUpdate {
                    progress_percent: Some(progress_percent),
                    tiles_processed: Some(tiles_processed),
                    tiles_total: Some(tiles_total),
                    ..Default::default()
                },
            )
            .await?;
        self.hub.publish_job(&job).await;
        Ok(())
    }

    /// Marks the job `SUCCEEDED` with the given output path. The executor
    /// contract requires calling this (or returning an `Err`) before
    /// `execute` returns. The `Scheduler` does not do it on the executor's
    /// behalf for the success path, only for the failure path.
    pub async fn succeed(&self, output_path: impl Into<String>) -> anyhow::Result<()> {
        use crate::domain::JobStatus;
        let job = self
            .store
            .update_job(
                self.job_id,
                JobUpdate {
                    status: Some(JobStatus::Succeeded),
                    output_path: Some(output_path.into()),
                    progress_percent: Some(100.0),
                    completed_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.hub.publish_job(&job).await;
        Ok(())
    }
}

/// The opaque job executor. Implementations perform the real work (or a
/// simulation of it) and either leave the job `SUCCEEDED` via
/// `ExecutionContext::succeed` and return `Ok(())`, or return `Err`, in
/// which case the `Scheduler` marks the job `FAILED` with the error's
/// string form.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: crate::domain::Job, ctx: ExecutionContext) -> anyhow::Result<()>;
}

/// Thin wrapper the `Scheduler` calls through; exists so the scheduler never
/// has to construct an `ExecutionContext` itself or know about `ProgressHub`.
#[derive(Clone)]
pub struct ExecutorAdapter {
    executor: Arc<dyn JobExecutor>,
    store: Store,
    hub: ProgressHub,
}

impl ExecutorAdapter {
    pub fn new(executor: Arc<dyn JobExecutor>, store: Store, hub: ProgressHub) -> Self {
        Self { executor, store, hub }
    }

    pub async fn execute(&self, job: crate::domain::Job) -> anyhow::Result<()> {
        let ctx = ExecutionContext::new(self.store.clone(), self.hub.clone(), job.id);
        self.executor.execute(job, ctx).await
    }
}
