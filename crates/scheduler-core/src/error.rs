//! Domain error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::JobStatus;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("user {caller} is not the owner of this resource")]
    Forbidden { caller: String },

    /// Raised by `Store::update_job` when a status write does not follow
    /// `JobStatus::can_transition_to`. `Scheduler::cancel_job`'s own
    /// not-PENDING case is handled separately (it returns `Ok(false)`, not
    /// an error, per its documented contract) and never raises this variant.
    #[error("job {job_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("workflow DAG must have at least one branch with at least one job")]
    EmptyDag,

    #[error("executor failed: {0}")]
    ExecutorFailure(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
