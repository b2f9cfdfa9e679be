//! Progress fan-out.
//!
//! Subscribers are plain `mpsc::UnboundedSender`s, keyed by a `SubscriptionId`
//! so callers can unsubscribe explicitly (e.g. on WebSocket disconnect), while
//! a closed receiver is detected and dropped the next time a publish to it
//! fails, so a subscriber that simply disappears without calling
//! `unsubscribe_*` is still cleaned up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::{Job, JobStatus, Workflow, WorkflowStatus};
use crate::store::Store;

pub type SubscriptionId = Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub tiles_processed: u64,
    pub tiles_total: u64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            workflow_id: job.workflow_id,
            status: job.status,
            progress_percent: job.progress_percent,
            tiles_processed: job.tiles_processed,
            tiles_total: job.tiles_total,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowProgressUpdate {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub total_jobs: u64,
    pub progress_percent: f64,
    pub timestamp: DateTime<Utc>,
}

type JobSinks = HashMap<Uuid, Vec<(SubscriptionId, mpsc::UnboundedSender<ProgressUpdate>)>>;
type WorkflowSinks = HashMap<Uuid, Vec<(SubscriptionId, mpsc::UnboundedSender<WorkflowProgressUpdate>)>>;

/// Multiplexes job/workflow progress to subscribers. Delivery is best-effort
/// and never blocks the publisher: a disconnected sink is dropped, others are
/// unaffected, and publishing with zero subscribers is a no-op.
#[derive(Clone)]
pub struct ProgressHub {
    job_subs: Arc<RwLock<JobSinks>>,
    workflow_subs: Arc<RwLock<WorkflowSinks>>,
    store: Store,
}

impl ProgressHub {
    pub fn new(store: Store) -> Self {
        Self {
            job_subs: Arc::new(RwLock::new(HashMap::new())),
            workflow_subs: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    /// Subscribes to a job's progress, immediately delivering `job`'s current
    /// snapshot on the returned channel before any live update can arrive.
    pub async fn subscribe_job(&self, job: &Job) -> (SubscriptionId, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ProgressUpdate::from_job(job));
        let id = Uuid::now_v7();
        self.job_subs.write().await.entry(job.id).or_default().push((id, tx));
        (id, rx)
    }

    pub async fn unsubscribe_job(&self, job_id: Uuid, subscription: SubscriptionId) {
        let mut subs = self.job_subs.write().await;
        if let Some(sinks) = subs.get_mut(&job_id) {
            sinks.retain(|(id, _)| *id != subscription);
            if sinks.is_empty() {
                subs.remove(&job_id);
            }
        }
    }

    /// Subscribes to a workflow's aggregate progress, immediately delivering
    /// the current aggregate snapshot (computed from the `Store`).
    pub async fn subscribe_workflow(
        &self,
        workflow: &Workflow,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<WorkflowProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = self.aggregate(workflow).await;
        let _ = tx.send(initial);
        let id = Uuid::now_v7();
        self.workflow_subs
            .write()
            .await
            .entry(workflow.id)
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    pub async fn unsubscribe_workflow(&self, workflow_id: Uuid, subscription: SubscriptionId) {
        let mut subs = self.workflow_subs.write().await;
        if let Some(sinks) = subs.get_mut(&workflow_id) {
            sinks.retain(|(id, _)| *id != subscription);
            if sinks.is_empty() {
                subs.remove(&workflow_id);
            }
        }
    }

    /// Publishes `job`'s current snapshot to every `job_id` subscriber.
    /// Preserves per-sink order because each sink is a single `mpsc` queue
    /// and `publish_job` is only ever called under the scheduler's own
    /// per-job serialization (one branch token at a time).
    pub async fn publish_job(&self, job: &Job) {
        let update = ProgressUpdate::from_job(job);
        let mut subs = self.job_subs.write().await;
        if let Some(sinks) = subs.get_mut(&job.id) {
            sinks.retain(|(_, tx)| tx.send(update.clone()).is_ok());
            if sinks.is_empty() {
                subs.remove(&job.id);
            }
        }
    }

    /// Recomputes aggregate progress for `workflow_id` from the `Store` and
    /// publishes it to every workflow subscriber.
    pub async fn publish_workflow(&self, workflow: &Workflow) {
        let update = self.aggregate(workflow).await;
        let mut subs = self.workflow_subs.write().await;
        if let Some(sinks) = subs.get_mut(&workflow.id) {
            sinks.retain(|(_, tx)| tx.send(update.clone()).is_ok());
            if sinks.is_empty() {
                subs.remove(&workflow.id);
            }
        }
    }

    /// Computes the current aggregate progress for `workflow` without
    /// subscribing. Used by the transport layer to answer a one-shot
    /// `GET /workflows/{id}` with the same aggregate a subscriber would see.
    pub async fn workflow_progress(&self, workflow: &Workflow) -> WorkflowProgressUpdate {
        self.aggregate(workflow).await
    }

    async fn aggregate(&self, workflow: &Workflow) -> WorkflowProgressUpdate {
        let jobs = self.store.list_workflow_jobs(workflow.id).await;
        let progress_percent = if jobs.is_empty() {
            0.0
        } else {
            jobs.iter().map(|j| j.progress_percent).sum::<f64>() / jobs.len() as f64
        };
        WorkflowProgressUpdate {
            workflow_id: workflow.id,
            status: workflow.status,
            completed_jobs: workflow.completed_jobs,
            failed_jobs: workflow.failed_jobs,
            total_jobs: workflow.total_jobs,
            progress_percent,
            timestamp: Utc::now(),
        }
    }
}
