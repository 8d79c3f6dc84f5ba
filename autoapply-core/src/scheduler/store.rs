use async_trait::async_trait;

use super::events::{JobEvent, NewJobEvent};
use super::job::{JobId, JobRecord, JobStatus, NewJob};
use super::retry::Transition;
use crate::error::Result;

/// Dashboard feed size when the caller does not ask for a specific one.
pub const DEFAULT_RECENT_EVENTS: usize = 100;

/// Durable ground truth for job status and the append-only event log.
///
/// Every mutation of a job row happens in the same transaction as the event
/// that describes it, so status and audit trail never diverge.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `queued` job together with its "submitted" event.
    async fn submit(&self, job: NewJob) -> Result<JobRecord>;

    /// Point lookup. Unknown ids yield [`SchedulerError::NotFound`].
    ///
    /// [`SchedulerError::NotFound`]: crate::error::SchedulerError::NotFound
    async fn get(&self, id: JobId) -> Result<JobRecord>;

    /// Newest first, optionally filtered by status.
    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<JobRecord>>;

    /// Number of jobs currently in `processing`.
    async fn count_processing(&self) -> Result<u64>;

    /// Atomically promote up to `limit` queued jobs to `processing`, ordered
    /// by priority ascending then creation time ascending. Each promotion
    /// appends one `info` event in the same transaction. Two concurrent
    /// callers never receive the same job.
    async fn claim_eligible(&self, limit: usize) -> Result<Vec<JobRecord>>;

    /// Return a claimed job to `queued` without spending a retry. Used when
    /// a claimed id could not be handed to a worker.
    async fn release_claim(&self, id: JobId, reason: &str) -> Result<JobRecord>;

    /// Apply a worker outcome to a job that must still be `processing`.
    /// Anything else yields [`SchedulerError::Conflict`] and leaves the row
    /// untouched.
    ///
    /// [`SchedulerError::Conflict`]: crate::error::SchedulerError::Conflict
    async fn apply_transition(&self, id: JobId, transition: &Transition) -> Result<JobRecord>;

    /// Append an event and refresh the owning job's `last_status_message`.
    async fn append_event(&self, id: JobId, event: NewJobEvent) -> Result<JobEvent>;

    /// Full trail for one job, oldest first.
    async fn job_events(&self, id: JobId) -> Result<Vec<JobEvent>>;

    /// Latest events across all jobs, newest first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<JobEvent>>;
}
