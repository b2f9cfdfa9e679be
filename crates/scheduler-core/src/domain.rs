//! Entities and state machines: `Workflow`, `Job`, `JobConfig`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque tenant identifier, supplied by the transport layer (e.g. `X-User-ID`).
pub type UserId = String;
pub type BranchId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// True if `self -> next` is a legal transition per the job FSM.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Tagged job type. New pipeline stages are added as new variants here; the
/// scheduler itself never branches on `JobType` (it is opaque forwarding data
/// for the `JobExecutor`), so adding one never touches scheduling logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Segmentation,
    TissueMask,
}

/// Input-only description of a single job, as submitted inside a workflow's DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub input_image_path: String,
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

/// A DAG is a mapping from branch id to an ordered sequence of job configs.
/// `IndexMap` (not `HashMap`) so the branch order a caller submits is the
/// order `Workflow::branch_order` records.
pub type Dag = IndexMap<BranchId, Vec<JobConfig>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub branch_id: BranchId,
    pub user_id: UserId,

    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,

    pub input_image_path: String,
    pub output_path: Option<String>,
    pub error_message: Option<String>,

    pub progress_percent: f64,
    pub tiles_processed: u64,
    pub tiles_total: u64,

    pub params: HashMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(workflow_id: Uuid, branch_id: BranchId, user_id: UserId, config: &JobConfig) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            branch_id,
            user_id,
            job_type: config.job_type.clone(),
            status: JobStatus::Pending,
            input_image_path: config.input_image_path.clone(),
            output_path: None,
            error_message: None,
            progress_percent: 0.0,
            tiles_processed: 0,
            tiles_total: 0,
            params: config.params.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Field-level patch applied atomically by the `Store`. `None` means "leave unchanged".
///
/// Every field is an `Option<Option<T>>` only where the underlying field is itself
/// optional and clearable; otherwise `Option<T>`, mirroring the `UpdateUser`-style
/// partial-update structs this codebase uses for its repositories.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub progress_percent: Option<f64>,
    pub tiles_processed: Option<u64>,
    pub tiles_total: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    /// Branch ids in submission order, as recorded from the DAG's key order
    /// at `create_workflow` time. Purely descriptive: branches are dispatched
    /// concurrently as independent tasks (`WorkflowDriver`), so nothing reads
    /// this field to decide dispatch order.
    pub branch_order: Vec<BranchId>,
    pub status: WorkflowStatus,

    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub status: Option<WorkflowStatus>,
    pub completed_jobs: Option<u64>,
    pub failed_jobs: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
