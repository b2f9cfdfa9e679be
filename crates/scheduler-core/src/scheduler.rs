//! Scheduling engine: global worker cap, per-branch serialization, cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{BranchId, JobStatus, JobUpdate, WorkflowStatus, WorkflowUpdate};
use crate::error::{Result, SchedulerError};
use crate::executor_adapter::ExecutorAdapter;
use crate::progress::ProgressHub;
use crate::store::Store;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    pub running_jobs: usize,
    pub max_workers: usize,
}

/// Runs at most `max_workers` jobs concurrently across the whole process,
/// while serializing jobs within a `(workflow_id, branch_id)` to at most one
/// at a time. Branch locks are created lazily and kept for the life of the
/// process.
#[derive(Clone)]
pub struct Scheduler {
    max_workers: usize,
    worker_semaphore: Arc<Semaphore>,
    branch_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    running_jobs: Arc<Mutex<HashSet<Uuid>>>,
    store: Store,
    hub: ProgressHub,
    executor: ExecutorAdapter,
}

impl Scheduler {
    pub fn new(max_workers: usize, store: Store, hub: ProgressHub, executor: ExecutorAdapter) -> Self {
        Self {
            max_workers,
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            branch_locks: Arc::new(Mutex::new(HashMap::new())),
            running_jobs: Arc::new(Mutex::new(HashSet::new())),
            store,
            hub,
            executor,
        }
    }

    fn branch_key(workflow_id: Uuid, branch_id: &BranchId) -> String {
        format!("{workflow_id}:{branch_id}")
    }

    async fn branch_lock(&self, workflow_id: Uuid, branch_id: &BranchId) -> Arc<Mutex<()>> {
        let key = Self::branch_key(workflow_id, branch_id);
        let mut locks = self.branch_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Executes job `job_id` under branch serialization and the worker cap.
    /// Returns once the job has reached a terminal state (or was skipped
    /// because it was cancelled before its worker slot came up).
    pub async fn schedule_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.store.get_job(job_id).await?;
        let branch_lock = self.branch_lock(job.workflow_id, &job.branch_id).await;
        let _branch_guard = branch_lock.lock().await;

        // Re-read under the branch lock: a concurrent cancel may have landed
        // between the dispatcher picking this job up and now.
        let job = self.store.get_job(job_id).await?;
        if job.status.is_terminal() {
            info!(job_id = %job_id, status = ?job.status, "job already terminal before dispatch, skipping");
            return Ok(());
        }

        info!(job_id = %job_id, busy = self.running_jobs.lock().await.len(), max = self.max_workers, "waiting for worker slot");
        let permit = self
            .worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed");

        let job = self
            .store
            .update_job(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.running_jobs.lock().await.insert(job_id);
        self.hub.publish_job(&job).await;
        info!(job_id = %job_id, "job running");

        let result = self.executor.execute(job.clone()).await;

        if let Err(e) = &result {
            let failure = SchedulerError::ExecutorFailure(e.to_string());
            warn!(job_id = %job_id, error = %failure, "job failed");
            let failed = self
                .store
                .update_job(
                    job_id,
                    JobUpdate {
                        status: Some(JobStatus::Failed),
                        error_message: Some(failure.to_string()),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            self.hub.publish_job(&failed).await;
        }

        // Guaranteed-executed post-step: running-set cleanup, worker release,
        // aggregate recompute, in that order.
        self.running_jobs.lock().await.remove(&job_id);
        drop(permit);
        self.recompute_workflow(job.workflow_id).await?;

        Ok(())
    }

    /// The only externally callable cancellation entry. Returns `false`
    /// without effect if the job is not `PENDING`.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool> {
        let job = self.store.get_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        let cancelled = self
            .store
            .update_job(job_id, JobUpdate::status(JobStatus::Cancelled))
            .await?;
        self.hub.publish_job(&cancelled).await;
        self.recompute_workflow(cancelled.workflow_id).await?;
        info!(job_id = %job_id, "job cancelled");
        Ok(true)
    }

    /// Recomputes and persists a workflow's aggregate status/counters after
    /// any job terminal transition, then republishes the workflow snapshot.
    pub async fn recompute_workflow(&self, workflow_id: Uuid) -> Result<()> {
        let jobs = self.store.list_workflow_jobs(workflow_id).await;
        let total = jobs.len() as u64;
        let completed = jobs.iter().filter(|j| j.status == JobStatus::Succeeded).count() as u64;
        let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count() as u64;
        let cancelled = jobs.iter().filter(|j| j.status == JobStatus::Cancelled).count() as u64;
        let any_running = jobs.iter().any(|j| j.status == JobStatus::Running);

        // A cancelled job is terminal but counts toward neither `completed`
        // nor `failed`; it still has to be counted here or a workflow with
        // any cancelled job can never reach `total` and is stuck RUNNING.
        let status = if total > 0 && completed + failed + cancelled == total {
            if failed > 0 {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Succeeded
            }
        } else if completed > 0 || any_running {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Pending
        };

        let completed_at = matches!(status, WorkflowStatus::Succeeded | WorkflowStatus::Failed)
            .then(Utc::now);

        let mut update = WorkflowUpdate {
            status: Some(status),
            completed_jobs: Some(completed),
            failed_jobs: Some(failed),
            ..Default::default()
        };
        update.completed_at = completed_at;

        let workflow = self.store.update_workflow(workflow_id, update).await?;
        self.hub.publish_workflow(&workflow).await;
        Ok(())
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running_jobs: self.running_jobs.lock().await.len(),
            max_workers: self.max_workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobConfig, JobType, Workflow};
    use crate::executor_adapter::{ExecutionContext, JobExecutor};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct InstantSucceed;

    #[async_trait]
    impl JobExecutor for InstantSucceed {
        async fn execute(&self, job: Job, ctx: ExecutionContext) -> anyhow::Result<()> {
            ctx.succeed(format!("/out/{}", job.id)).await?;
            Ok(())
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl JobExecutor for AlwaysFail {
        async fn execute(&self, _job: Job, _ctx: ExecutionContext) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    /// Tracks concurrently-running jobs to assert the worker cap and branch
    /// serialization invariants.
    struct Tracking {
        concurrent: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl JobExecutor for Tracking {
        async fn execute(&self, job: Job, ctx: ExecutionContext) -> anyhow::Result<()> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            ctx.succeed(format!("/out/{}", job.id)).await?;
            Ok(())
        }
    }

    async fn make_scheduler(max_workers: usize, executor: Arc<dyn JobExecutor>) -> (Scheduler, Store) {
        let store = Store::new();
        let hub = ProgressHub::new(store.clone());
        let adapter = ExecutorAdapter::new(executor, store.clone(), hub.clone());
        (Scheduler::new(max_workers, store.clone(), hub, adapter), store)
    }

    fn job_config() -> JobConfig {
        JobConfig {
            job_type: JobType::TissueMask,
            input_image_path: "/tmp/a.svs".into(),
            params: StdHashMap::new(),
        }
    }

    async fn seed_workflow(store: &Store, branches: &[(&str, usize)]) -> (Workflow, Vec<Uuid>) {
        let total: usize = branches.iter().map(|(_, n)| n).sum();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            user_id: "u1".into(),
            name: "w".into(),
            branch_order: branches.iter().map(|(b, _)| b.to_string()).collect(),
            status: WorkflowStatus::Pending,
            total_jobs: total as u64,
            completed_jobs: 0,
            failed_jobs: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let workflow = store.create_workflow(workflow).await;
        let mut ids = Vec::new();
        for (branch, count) in branches {
            for _ in 0..*count {
                let job = Job::new(workflow.id, branch.to_string(), "u1".into(), &job_config());
                ids.push(job.id);
                store.create_job(job).await;
            }
        }
        (workflow, ids)
    }

    #[tokio::test]
    async fn job_succeeds_and_workflow_recomputes() {
        let (scheduler, store) = make_scheduler(2, Arc::new(InstantSucceed)).await;
        let (workflow, jobs) = seed_workflow(&store, &[("b1", 1)]).await;

        scheduler.schedule_job(jobs[0]).await.unwrap();

        let job = store.get_job(jobs[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress_percent, 100.0);

        let workflow = store.get_workflow(workflow.id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Succeeded);
        assert_eq!(workflow.completed_jobs, 1);
    }

    #[tokio::test]
    async fn executor_failure_marks_job_failed_and_workflow_failed() {
        let (scheduler, store) = make_scheduler(2, Arc::new(AlwaysFail)).await;
        let (workflow, jobs) = seed_workflow(&store, &[("b1", 1)]).await;

        scheduler.schedule_job(jobs[0]).await.unwrap();

        let job = store.get_job(jobs[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.is_some());

        let workflow = store.get_workflow(workflow.id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert_eq!(workflow.failed_jobs, 1);
    }

    #[tokio::test]
    async fn cancel_pending_job_then_cancel_again_is_idempotent_false() {
        let (scheduler, store) = make_scheduler(1, Arc::new(InstantSucceed)).await;
        let (_workflow, jobs) = seed_workflow(&store, &[("b1", 1)]).await;

        assert!(scheduler.cancel_job(jobs[0]).await.unwrap());
        assert!(!scheduler.cancel_job(jobs[0]).await.unwrap());

        let job = store.get_job(jobs[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cannot_cancel_a_running_or_terminal_job() {
        let (scheduler, store) = make_scheduler(1, Arc::new(InstantSucceed)).await;
        let (_workflow, jobs) = seed_workflow(&store, &[("b1", 1)]).await;
        scheduler.schedule_job(jobs[0]).await.unwrap();
        assert!(!scheduler.cancel_job(jobs[0]).await.unwrap());
    }

    #[tokio::test]
    async fn worker_cap_is_respected_across_branches() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(Tracking {
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
            delay: Duration::from_millis(50),
        });
        let (scheduler, store) = make_scheduler(2, executor).await;
        let (_workflow, jobs) = seed_workflow(&store, &[("b1", 1), ("b2", 1), ("b3", 1), ("b4", 1)]).await;

        let mut handles = Vec::new();
        for job_id in jobs {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move { scheduler.schedule_job(job_id).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2, "worker cap of 2 must never be exceeded");
    }

    #[tokio::test]
    async fn branch_serializes_jobs_strictly_one_at_a_time() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(Tracking {
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
            delay: Duration::from_millis(30),
        });
        let (scheduler, store) = make_scheduler(4, executor).await;
        let (_workflow, jobs) = seed_workflow(&store, &[("only-branch", 3)]).await;

        // Concurrent submission exercises mutual exclusion regardless of
        // arrival order; the ordering guarantee itself is a property of the
        // branch dispatcher (`WorkflowDriver`) calling `schedule_job`
        // sequentially, covered by the driver's own tests.
        let mut handles = Vec::new();
        for job_id in jobs.clone() {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move { scheduler.schedule_job(job_id).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "a single branch must never run two jobs at once");
    }

    #[tokio::test]
    async fn sequential_dispatch_within_a_branch_yields_nondecreasing_started_at() {
        let (scheduler, store) = make_scheduler(4, Arc::new(InstantSucceed)).await;
        let (_workflow, jobs) = seed_workflow(&store, &[("only-branch", 3)]).await;

        for job_id in jobs.clone() {
            scheduler.schedule_job(job_id).await.unwrap();
        }

        let mut started = Vec::new();
        for job_id in jobs {
            started.push(store.get_job(job_id).await.unwrap().started_at.unwrap());
        }
        let mut sorted = started.clone();
        sorted.sort();
        assert_eq!(started, sorted, "sequential dispatch must produce non-decreasing started_at");
    }
}
