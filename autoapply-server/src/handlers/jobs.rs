use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use autoapply_core::scheduler::{JobEvent, JobId, JobRecord, JobStatus, JobTarget, NewJob};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1_000;

/// Either a newline separated block of URLs, an explicit list of jobs, or
/// both.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitJobsRequest {
    #[serde(default)]
    pub urls: Option<String>,
    #[serde(default)]
    pub jobs: Vec<SubmitJob>,
    /// Applied to entries that do not carry their own.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    pub target: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SkippedTarget {
    pub input: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobsResponse {
    pub created: Vec<JobRecord>,
    pub skipped: Vec<SkippedTarget>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct JobEventsResponse {
    pub job_id: JobId,
    pub events: Vec<JobEvent>,
}

pub(crate) fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse::<JobId>().map_err(AppError::from)
}

pub async fn submit_jobs_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobsRequest>,
) -> AppResult<impl IntoResponse> {
    let tuning = state.scheduler().config();
    let default_priority = request.priority.unwrap_or(tuning.default_priority);
    let default_max_retries = request.max_retries.unwrap_or(tuning.default_max_retries);

    let mut candidates: Vec<SubmitJob> = request
        .urls
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| SubmitJob {
            target: line.to_string(),
            job_title: None,
            company_name: None,
            priority: None,
            max_retries: None,
        })
        .collect();
    candidates.extend(request.jobs);

    if candidates.is_empty() {
        return Err(AppError::bad_request("No job targets supplied"));
    }

    let mut created = Vec::new();
    let mut skipped = Vec::new();
    let mut store_failure = None;
    for candidate in candidates {
        let target = match JobTarget::parse(&candidate.target) {
            Ok(target) => target,
            Err(err) => {
                warn!(input = %candidate.target, error = %err, "skipping submission");
                skipped.push(SkippedTarget {
                    input: candidate.target,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let mut job = NewJob::new(target)
            .with_priority(candidate.priority.unwrap_or(default_priority))
            .with_max_retries(candidate.max_retries.unwrap_or(default_max_retries));
        if let Some(title) = candidate.job_title {
            job = job.with_title(title);
        }
        if let Some(company) = candidate.company_name {
            job = job.with_company(company);
        }

        // Submissions are not atomic as a batch: an entry the store rejects
        // is reported under `skipped` and the rest still go through.
        match state.store().submit(job.normalized()).await {
            Ok(record) => created.push(record),
            Err(err) => {
                error!(input = %candidate.target, error = %err, "failed to store submission");
                skipped.push(SkippedTarget {
                    input: candidate.target,
                    reason: err.to_string(),
                });
                store_failure = Some(err);
            }
        }
    }

    // Nothing was stored, so surfacing the store error is unambiguous.
    if created.is_empty()
        && let Some(err) = store_failure
    {
        return Err(err.into());
    }

    info!(
        created = created.len(),
        skipped = skipped.len(),
        "jobs submitted"
    );

    let status = if created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(SubmitJobsResponse { created, skipped })))
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<Json<JobListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()?;

    let jobs = state
        .store()
        .list_jobs(status, clamp_limit(query.limit))
        .await?;
    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobRecord>> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.store().get(id).await?))
}

pub async fn job_events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobEventsResponse>> {
    let job_id = parse_job_id(&id)?;
    let events = state.store().job_events(job_id).await?;
    Ok(Json(JobEventsResponse { job_id, events }))
}
