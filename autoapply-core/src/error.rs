use thiserror::Error;

use crate::scheduler::job::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job {id} is {actual}, expected {expected}")]
    Conflict {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler configuration rejected: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// True for failures of the backing store itself, as opposed to a
    /// rejected request.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_) | SchedulerError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
