use std::{
    any::{Any, type_name_of_val},
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::adapter::{ApplicantContext, ApplicantSource, ExecutionAdapter, ExecutionRequest};
use super::channel::{Delivery, DeliveryReceiver, Received};
use super::events::EventLevel;
use super::job::{JobId, JobRecord, JobStatus};
use super::retry::{AttemptResult, plan_transition};
use super::store::JobStore;
use crate::error::SchedulerError;

/// What happened to one delivery, mostly useful to tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The outcome was committed and the job moved to `status`.
    Committed { status: JobStatus },
    /// The job was not `processing` when loaded.
    Skipped { status: JobStatus },
    /// The id does not exist in the store.
    Missing,
    /// The store failed; the job was left as it was.
    StoreFailure,
}

/// Long-lived consumer of the delivery channel. Executes one job at a time.
pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn ExecutionAdapter>,
    applicants: Arc<dyn ApplicantSource>,
    receiver: DeliveryReceiver,
    receive_timeout: Duration,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("adapter", &type_name_of_val(self.adapter.as_ref()))
            .field("receive_timeout", &self.receive_timeout)
            .finish()
    }
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn ExecutionAdapter>,
        applicants: Arc<dyn ApplicantSource>,
        receiver: DeliveryReceiver,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            adapter,
            applicants,
            receiver,
            receive_timeout,
        }
    }

    /// Consumes deliveries until a sentinel arrives, the channel closes, or
    /// `shutdown` is observed between jobs. A job that has started always
    /// runs to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker = %self.name, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.receiver.recv_timeout(self.receive_timeout).await {
                Received::Delivery(Delivery::Job(id)) => {
                    self.process(id).await;
                }
                Received::Delivery(Delivery::Shutdown) => {
                    debug!(worker = %self.name, "shutdown sentinel received");
                    break;
                }
                Received::TimedOut => {}
                Received::Closed => break,
            }
        }
        info!(worker = %self.name, "worker shutting down");
    }

    /// Loads, executes and commits one job.
    pub async fn process(&self, id: JobId) -> ProcessOutcome {
        let span = info_span!("job", worker = %self.name, job_id = %id);
        self.process_inner(id).instrument(span).await
    }

    async fn process_inner(&self, id: JobId) -> ProcessOutcome {
        let job = match self.store.get(id).await {
            Ok(job) => job,
            Err(SchedulerError::NotFound(_)) => {
                error!("delivered job does not exist; skipping");
                return ProcessOutcome::Missing;
            }
            Err(err) => {
                error!(error = %err, "failed to load job; it stays processing");
                return ProcessOutcome::StoreFailure;
            }
        };

        if job.status != JobStatus::Processing {
            warn!(status = %job.status, "job is no longer processing; skipping");
            return ProcessOutcome::Skipped { status: job.status };
        }

        let attempt = match self.applicants.load().await {
            Ok(Some(applicant)) => self.execute(&job, applicant).await,
            Ok(None) => AttemptResult::MissingApplicant,
            Err(err) => {
                error!(error = %err, "failed to load applicant profile; job stays processing");
                return ProcessOutcome::StoreFailure;
            }
        };

        let transition = plan_transition(&job, attempt);
        match self.store.apply_transition(id, &transition).await {
            Ok(updated) => {
                match transition.event.level {
                    EventLevel::Critical | EventLevel::Error => error!(
                        status = %updated.status,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        message = %transition.event.message,
                        "job attempt failed"
                    ),
                    EventLevel::Warn => warn!(
                        status = %updated.status,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        "job requeued for retry"
                    ),
                    _ => info!(status = %updated.status, "job finished"),
                }
                ProcessOutcome::Committed {
                    status: updated.status,
                }
            }
            Err(err) => {
                // Store writes failed: the tracing log is the only record.
                error!(
                    error = %err,
                    planned_status = %transition.to,
                    planned_retry_count = transition.retry_count,
                    event = %transition.event.status_line(),
                    "failed to commit job outcome; job left processing"
                );
                ProcessOutcome::StoreFailure
            }
        }
    }

    async fn execute(&self, job: &JobRecord, applicant: ApplicantContext) -> AttemptResult {
        let request = ExecutionRequest::for_job(job, applicant);
        info!(
            attempt = request.attempt,
            platform = %request.platform,
            target = %request.target,
            "invoking execution adapter"
        );

        match AssertUnwindSafe(self.adapter.execute(&request))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => AttemptResult::Reported(outcome),
            Ok(Err(err)) => AttemptResult::Crashed {
                detail: err.to_string(),
            },
            Err(panic) => AttemptResult::Crashed {
                detail: format!("adapter panicked: {}", panic_message(panic.as_ref())),
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
