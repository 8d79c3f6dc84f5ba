//! Outcome handling for a single attempt.
//!
//! [`plan_transition`] is pure: it maps the job as loaded by the worker and
//! the attempt result to the exact row update and event the store must apply
//! atomically.

use serde::Serialize;

use super::adapter::AdapterOutcome;
use super::events::{EventLevel, NewJobEvent};
use super::job::{JobRecord, JobStatus};

/// How one attempt ended, from the worker's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptResult {
    /// The adapter ran to completion and reported an outcome.
    Reported(AdapterOutcome),
    /// The adapter returned an error or panicked.
    Crashed { detail: String },
    /// No applicant profile exists; the adapter was never invoked.
    MissingApplicant,
}

/// Row update produced by a worker for a job it holds in `processing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub to: JobStatus,
    pub retry_count: u32,
    /// Replaces `error_details`; `None` clears it.
    pub error_details: Option<String>,
    /// Replaces `result_artifact_path` only when present.
    pub artifact_path: Option<String>,
    pub event: NewJobEvent,
}

impl Transition {
    /// Terminal transitions stamp `ended_at`; a requeue clears it.
    pub fn ends_job(&self) -> bool {
        self.to.is_terminal()
    }
}

pub const MISSING_APPLICANT_MESSAGE: &str = "Applicant profile not found; cannot proceed";

pub fn plan_transition(job: &JobRecord, attempt: AttemptResult) -> Transition {
    match attempt {
        AttemptResult::Reported(AdapterOutcome::Succeeded {
            artifact_path,
            message,
        }) => Transition {
            to: JobStatus::Succeeded,
            retry_count: job.retry_count,
            error_details: None,
            event: NewJobEvent::new(
                EventLevel::Success,
                with_detail("Automation succeeded", message.as_deref()),
            )
            .with_artifact(artifact_path.clone()),
            artifact_path,
        },
        AttemptResult::Reported(AdapterOutcome::PendingReview {
            artifact_path,
            message,
        }) => Transition {
            to: JobStatus::PendingReview,
            retry_count: job.retry_count,
            error_details: None,
            event: NewJobEvent::new(
                EventLevel::Pending,
                with_detail("Awaiting human review", message.as_deref()),
            )
            .with_artifact(artifact_path.clone()),
            artifact_path,
        },
        AttemptResult::Reported(AdapterOutcome::Failed { detail }) => {
            failure(job, detail, EventLevel::Warn, EventLevel::Error, "Attempt failed")
        }
        AttemptResult::Crashed { detail } => failure(
            job,
            detail,
            EventLevel::Critical,
            EventLevel::Critical,
            "Adapter crashed",
        ),
        AttemptResult::MissingApplicant => Transition {
            to: JobStatus::FailedFinal,
            retry_count: job.retry_count,
            error_details: Some(MISSING_APPLICANT_MESSAGE.to_string()),
            artifact_path: None,
            event: NewJobEvent::error(MISSING_APPLICANT_MESSAGE),
        },
    }
}

fn failure(
    job: &JobRecord,
    detail: String,
    requeue_level: EventLevel,
    final_level: EventLevel,
    label: &str,
) -> Transition {
    if job.can_retry() {
        let retry_count = job.retry_count + 1;
        Transition {
            to: JobStatus::Queued,
            retry_count,
            event: NewJobEvent::new(
                requeue_level,
                format!(
                    "{label}; requeued for retry {retry_count}/{}: {detail}",
                    job.max_retries
                ),
            ),
            error_details: Some(detail),
            artifact_path: None,
        }
    } else {
        Transition {
            to: JobStatus::FailedFinal,
            retry_count: job.retry_count,
            event: NewJobEvent::new(
                final_level,
                format!(
                    "{label}; failed permanently after {} retries: {detail}",
                    job.retry_count
                ),
            ),
            error_details: Some(detail),
            artifact_path: None,
        }
    }
}

fn with_detail(base: &str, detail: Option<&str>) -> String {
    match detail.map(str::trim).filter(|d| !d.is_empty()) {
        Some(detail) => format!("{base}: {detail}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::NewJob;
    use chrono::Utc;

    fn processing_job(retry_count: u32, max_retries: u32) -> JobRecord {
        let mut job = JobRecord::from_new(
            NewJob::parse("https://jobs.lever.co/acme/1")
                .expect("valid")
                .with_max_retries(max_retries),
            Utc::now(),
        );
        job.status = JobStatus::Processing;
        job.retry_count = retry_count;
        job
    }

    #[test]
    fn failure_below_ceiling_requeues_and_increments() {
        let job = processing_job(0, 2);
        let t = plan_transition(&job, AttemptResult::Reported(AdapterOutcome::failed("form changed")));
        assert_eq!(t.to, JobStatus::Queued);
        assert_eq!(t.retry_count, 1);
        assert_eq!(t.event.level, EventLevel::Warn);
        assert_eq!(t.error_details.as_deref(), Some("form changed"));
        assert!(!t.ends_job());
    }

    #[test]
    fn failure_at_ceiling_is_final_without_increment() {
        let job = processing_job(2, 2);
        let t = plan_transition(&job, AttemptResult::Reported(AdapterOutcome::failed("still broken")));
        assert_eq!(t.to, JobStatus::FailedFinal);
        assert_eq!(t.retry_count, 2);
        assert_eq!(t.event.level, EventLevel::Error);
        assert!(t.ends_job());
    }

    #[test]
    fn zero_retry_budget_fails_immediately() {
        let job = processing_job(0, 0);
        let t = plan_transition(&job, AttemptResult::Reported(AdapterOutcome::failed("nope")));
        assert_eq!(t.to, JobStatus::FailedFinal);
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn crash_retries_once_and_logs_critical() {
        let job = processing_job(1, 3);
        let t = plan_transition(
            &job,
            AttemptResult::Crashed {
                detail: "panicked at 'index out of bounds'".into(),
            },
        );
        assert_eq!(t.to, JobStatus::Queued);
        assert_eq!(t.retry_count, 2);
        assert_eq!(t.event.level, EventLevel::Critical);
        assert!(t.error_details.as_deref().unwrap_or_default().contains("index out of bounds"));
    }

    #[test]
    fn crash_at_ceiling_is_final_and_critical() {
        let job = processing_job(3, 3);
        let t = plan_transition(&job, AttemptResult::Crashed { detail: "boom".into() });
        assert_eq!(t.to, JobStatus::FailedFinal);
        assert_eq!(t.retry_count, 3);
        assert_eq!(t.event.level, EventLevel::Critical);
    }

    #[test]
    fn pending_review_keeps_artifact_and_retry_count() {
        let job = processing_job(1, 3);
        let t = plan_transition(
            &job,
            AttemptResult::Reported(AdapterOutcome::pending_review(Some("/shots/1.png".into()))),
        );
        assert_eq!(t.to, JobStatus::PendingReview);
        assert_eq!(t.retry_count, 1);
        assert_eq!(t.event.level, EventLevel::Pending);
        assert_eq!(t.artifact_path.as_deref(), Some("/shots/1.png"));
        assert_eq!(t.event.artifact_path.as_deref(), Some("/shots/1.png"));
        assert!(t.ends_job());
    }

    #[test]
    fn success_clears_previous_error() {
        let mut job = processing_job(1, 3);
        job.error_details = Some("earlier failure".into());
        let t = plan_transition(&job, AttemptResult::Reported(AdapterOutcome::succeeded()));
        assert_eq!(t.to, JobStatus::Succeeded);
        assert_eq!(t.error_details, None);
        assert_eq!(t.event.level, EventLevel::Success);
    }

    #[test]
    fn missing_applicant_never_retries() {
        let job = processing_job(0, 5);
        let t = plan_transition(&job, AttemptResult::MissingApplicant);
        assert_eq!(t.to, JobStatus::FailedFinal);
        assert_eq!(t.retry_count, 0);
        assert_eq!(t.event.message, MISSING_APPLICANT_MESSAGE);
    }
}
