use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Mutex;

use super::events::{EventLevel, JobEvent, NewJobEvent, PROMOTION_MESSAGE};
use super::job::{JobId, JobRecord, JobStatus, NewJob};
use super::retry::Transition;
use super::store::JobStore;
use crate::error::{Result, SchedulerError};

/// Job store kept entirely in process memory.
///
/// A single lock guards jobs and events together, which gives every
/// operation the same all-or-nothing behaviour as a store transaction.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, StoredJob>,
    events: Vec<JobEvent>,
    next_seq: u64,
    next_event_id: i64,
}

struct StoredJob {
    seq: u64,
    record: JobRecord,
}

impl fmt::Debug for InMemoryJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (jobs, events) = self
            .state
            .try_lock()
            .map(|state| (state.jobs.len(), state.events.len()))
            .unwrap_or_default();
        f.debug_struct("InMemoryJobStore")
            .field("jobs", &jobs)
            .field("events", &events)
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store: every call fails until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal("job store unavailable".into()));
        }
        Ok(())
    }
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Result<&mut JobRecord> {
        self.jobs
            .get_mut(&id)
            .map(|stored| &mut stored.record)
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Appends an event whose timestamp never goes backwards for its job.
    fn push_event(&mut self, job_id: JobId, event: NewJobEvent, now: DateTime<Utc>) -> Result<JobEvent> {
        let status_line = event.status_line();
        let job = self.job_mut(job_id)?;
        job.last_status_message = Some(status_line);

        let timestamp = self
            .events
            .iter()
            .rev()
            .find(|e| e.job_id == job_id)
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);

        self.next_event_id += 1;
        let stored = JobEvent {
            id: self.next_event_id,
            job_id,
            timestamp,
            level: event.level,
            message: event.message,
            artifact_path: event.artifact_path,
        };
        self.events.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn submit(&self, job: NewJob) -> Result<JobRecord> {
        self.ensure_available()?;
        let now = Utc::now();
        let record = JobRecord::from_new(job, now);
        let id = record.id;
        let submitted = NewJobEvent::info(format!("Job submitted for {}", record.target));

        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        state.jobs.insert(id, StoredJob { seq, record });
        state.push_event(id, submitted, now)?;
        Ok(state.job_mut(id)?.clone())
    }

    async fn get(&self, id: JobId) -> Result<JobRecord> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        state
            .jobs
            .get(&id)
            .map(|stored| stored.record.clone())
            .ok_or(SchedulerError::NotFound(id))
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<JobRecord>> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut jobs: Vec<&StoredJob> = state
            .jobs
            .values()
            .filter(|stored| status.is_none_or(|s| stored.record.status == s))
            .collect();
        jobs.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(jobs
            .into_iter()
            .take(limit)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn count_processing(&self) -> Result<u64> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|stored| stored.record.status == JobStatus::Processing)
            .count() as u64)
    }

    async fn claim_eligible(&self, limit: usize) -> Result<Vec<JobRecord>> {
        self.ensure_available()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        let mut eligible: Vec<(i32, DateTime<Utc>, u64, JobId)> = state
            .jobs
            .values()
            .filter(|stored| stored.record.status == JobStatus::Queued)
            .map(|stored| {
                (
                    stored.record.priority,
                    stored.record.created_at,
                    stored.seq,
                    stored.record.id,
                )
            })
            .collect();
        eligible.sort();

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(limit.min(eligible.len()));
        for (_, _, _, id) in eligible.into_iter().take(limit) {
            {
                let job = state.job_mut(id)?;
                job.status = JobStatus::Processing;
                job.last_attempted_at = Some(now);
            }
            state.push_event(id, NewJobEvent::info(PROMOTION_MESSAGE), now)?;
            claimed.push(state.job_mut(id)?.clone());
        }
        Ok(claimed)
    }

    async fn release_claim(&self, id: JobId, reason: &str) -> Result<JobRecord> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Processing {
            return Err(SchedulerError::Conflict {
                id,
                expected: JobStatus::Processing,
                actual: job.status,
            });
        }
        job.status = JobStatus::Queued;
        state.push_event(
            id,
            NewJobEvent::warn(format!("Returned to queue: {reason}")),
            Utc::now(),
        )?;
        Ok(state.job_mut(id)?.clone())
    }

    async fn apply_transition(&self, id: JobId, transition: &Transition) -> Result<JobRecord> {
        self.ensure_available()?;
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Processing {
            return Err(SchedulerError::Conflict {
                id,
                expected: JobStatus::Processing,
                actual: job.status,
            });
        }

        job.status = transition.to;
        job.retry_count = transition.retry_count;
        job.error_details = transition.error_details.clone();
        if let Some(path) = &transition.artifact_path {
            job.result_artifact_path = Some(path.clone());
        }
        job.ended_at = transition.ends_job().then_some(now);

        state.push_event(id, transition.event.clone(), now)?;
        Ok(state.job_mut(id)?.clone())
    }

    async fn append_event(&self, id: JobId, event: NewJobEvent) -> Result<JobEvent> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.push_event(id, event, Utc::now())
    }

    async fn job_events(&self, id: JobId) -> Result<Vec<JobEvent>> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        if !state.jobs.contains_key(&id) {
            return Err(SchedulerError::NotFound(id));
        }
        Ok(state
            .events
            .iter()
            .filter(|e| e.job_id == id)
            .cloned()
            .collect())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<JobEvent>> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.events.iter().rev().take(limit).cloned().collect())
    }
}

impl InMemoryJobStore {
    /// Number of events at `level` recorded for `id`.
    pub async fn count_events(&self, id: JobId, level: EventLevel) -> usize {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|e| e.job_id == id && e.level == level)
            .count()
    }
}
