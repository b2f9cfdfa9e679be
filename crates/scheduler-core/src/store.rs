//! In-memory entity repository for workflows and jobs.
//!
//! A single `tokio::sync::Mutex` is the mutual-exclusion domain for every
//! mutation and listing. At the scale this scheduler targets (a handful of
//! concurrent tenants, a handful of workers) a global lock is the simplest
//! correct choice and is never held across an `.await` other than the lock
//! acquisition itself; every method copies what it needs and returns.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Job, JobStatus, JobUpdate, UserId, Workflow, WorkflowUpdate};
use crate::error::{Result, SchedulerError};

#[derive(Default)]
struct StoreInner {
    workflows: HashMap<Uuid, Workflow>,
    jobs: HashMap<Uuid, Job>,
    /// Secondary index: user_id -> workflow ids in creation order.
    user_workflows: HashMap<UserId, Vec<Uuid>>,
}

/// Concurrent in-memory repository. Cheap to clone, it's a handle around an
/// `Arc<Mutex<_>>`, the same shape as this codebase's `Database` handle.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_workflow(&self, workflow: Workflow) -> Workflow {
        let mut inner = self.inner.lock().await;
        inner
            .user_workflows
            .entry(workflow.user_id.clone())
            .or_default()
            .push(workflow.id);
        inner.workflows.insert(workflow.id, workflow.clone());
        workflow
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        let inner = self.inner.lock().await;
        inner
            .workflows
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::WorkflowNotFound(id))
    }

    pub async fn list_user_workflows(&self, user_id: &str) -> Vec<Workflow> {
        let inner = self.inner.lock().await;
        inner
            .user_workflows
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| inner.workflows.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Compare-and-apply: a missing workflow returns `NotFound` with no side effect.
    pub async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> Result<Workflow> {
        let mut inner = self.inner.lock().await;
        let workflow = inner
            .workflows
            .get_mut(&id)
            .ok_or(SchedulerError::WorkflowNotFound(id))?;

        if let Some(status) = update.status {
            workflow.status = status;
        }
        if let Some(completed) = update.completed_jobs {
            workflow.completed_jobs = completed;
        }
        if let Some(failed) = update.failed_jobs {
            workflow.failed_jobs = failed;
        }
        if let Some(started_at) = update.started_at {
            workflow.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            workflow.completed_at = Some(completed_at);
        }
        Ok(workflow.clone())
    }

    pub async fn create_job(&self, job: Job) -> Job {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        job
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&id).cloned().ok_or(SchedulerError::JobNotFound(id))
    }

    pub async fn list_workflow_jobs(&self, workflow_id: Uuid) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|j| j.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    pub async fn list_running_jobs_for_user(&self, user_id: &str) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|j| j.user_id == user_id && j.status == JobStatus::Running)
            .cloned()
            .collect()
    }

    /// Compare-and-apply: a missing job returns `NotFound` with no side effect.
    /// Overwrites per field, not a merge; a `status` write that isn't a legal
    /// transition per `JobStatus::can_transition_to` is rejected with
    /// `InvalidTransition` before anything (including the other fields in
    /// this same `update`) is applied.
    pub async fn update_job(&self, id: Uuid, update: JobUpdate) -> Result<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))?;

        if let Some(status) = update.status {
            if status != job.status && !job.status.can_transition_to(status) {
                return Err(SchedulerError::InvalidTransition {
                    job_id: id,
                    from: job.status,
                    to: status,
                });
            }
            job.status = status;
        }
        if let Some(output_path) = update.output_path {
            job.output_path = Some(output_path);
        }
        if let Some(error_message) = update.error_message {
            job.error_message = Some(error_message);
        }
        if let Some(progress) = update.progress_percent {
            job.progress_percent = progress;
        }
        if let Some(processed) = update.tiles_processed {
            job.tiles_processed = processed;
        }
        if let Some(total) = update.tiles_total {
            job.tiles_total = total;
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dag, JobConfig, JobType, WorkflowStatus};
    use std::collections::HashMap;

    fn sample_workflow(user: &str) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            user_id: user.to_string(),
            name: "test".into(),
            branch_order: vec!["b1".into()],
            status: WorkflowStatus::Pending,
            total_jobs: 1,
            completed_jobs: 0,
            failed_jobs: 0,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn sample_job_config() -> JobConfig {
        JobConfig {
            job_type: JobType::Segmentation,
            input_image_path: "/tmp/slide.svs".into(),
            params: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn get_missing_workflow_is_not_found() {
        let store = Store::new();
        let err = store.get_workflow(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn update_missing_job_has_no_side_effect() {
        let store = Store::new();
        let missing = Uuid::now_v7();
        let err = store
            .update_job(missing, JobUpdate::status(JobStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound(_)));
        assert!(store.get_job(missing).await.is_err());
    }

    #[tokio::test]
    async fn list_user_workflows_is_fifo_by_creation() {
        let store = Store::new();
        let w1 = store.create_workflow(sample_workflow("u1")).await;
        let w2 = store.create_workflow(sample_workflow("u1")).await;
        let listed = store.list_user_workflows("u1").await;
        assert_eq!(listed.iter().map(|w| w.id).collect::<Vec<_>>(), vec![w1.id, w2.id]);
    }

    #[tokio::test]
    async fn field_updates_overwrite_not_merge() {
        let store = Store::new();
        let workflow = store.create_workflow(sample_workflow("u1")).await;
        let job = store
            .create_job(Job::new(workflow.id, "b1".into(), "u1".into(), &sample_job_config()))
            .await;

        store
            .update_job(
                job.id,
                JobUpdate {
                    tiles_processed: Some(3),
                    tiles_total: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store
            .update_job(
                job.id,
                JobUpdate {
                    tiles_processed: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.tiles_processed, 5);
        assert_eq!(updated.tiles_total, 10, "unrelated field must not be clobbered");
    }

    #[tokio::test]
    async fn list_running_jobs_for_user_filters_by_status_and_owner() {
        let store = Store::new();
        let workflow = store.create_workflow(sample_workflow("u1")).await;
        let job = store
            .create_job(Job::new(workflow.id, "b1".into(), "u1".into(), &sample_job_config()))
            .await;
        assert!(store.list_running_jobs_for_user("u1").await.is_empty());

        store.update_job(job.id, JobUpdate::status(JobStatus::Running)).await.unwrap();
        let running = store.list_running_jobs_for_user("u1").await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, job.id);
        assert!(store.list_running_jobs_for_user("u2").await.is_empty());
    }
}
