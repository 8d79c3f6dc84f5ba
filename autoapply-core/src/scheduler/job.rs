use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

/// Priority assigned to jobs whose producer did not pick one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Retry ceiling assigned to jobs whose producer did not pick one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for scheduled jobs.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| SchedulerError::InvalidInput(format!("bad job id '{s}': {e}")))
    }
}

/// Lifecycle status of a job.
///
/// `Queued` is both the initial state and the re-entry state of the retry
/// loop. Only the dispatcher moves a job into `Processing`; only workers move
/// it out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    PendingReview,
    Succeeded,
    FailedFinal,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::PendingReview => "pending_review",
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedFinal => "failed_final",
        }
    }

    /// Terminal statuses are never revisited by the scheduler.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::PendingReview | JobStatus::Succeeded | JobStatus::FailedFinal
        )
    }

    pub fn all() -> &'static [JobStatus] {
        &[
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::PendingReview,
            JobStatus::Succeeded,
            JobStatus::FailedFinal,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SchedulerError::InvalidInput(format!("unknown job status '{s}'")))
    }
}

/// Applicant tracking system recognised from the target URL.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Workday,
    Greenhouse,
    Lever,
    Unknown,
}

impl Platform {
    pub fn detect(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if host.contains("workday") || host.contains("myworkdayjobs") {
            Platform::Workday
        } else if host.contains("greenhouse.io") {
            Platform::Greenhouse
        } else if host.contains("lever.co") {
            Platform::Lever
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Workday => "Workday",
            Platform::Greenhouse => "Greenhouse",
            Platform::Lever => "Lever",
            Platform::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Workday" => Ok(Platform::Workday),
            "Greenhouse" => Ok(Platform::Greenhouse),
            "Lever" => Ok(Platform::Lever),
            "Unknown" => Ok(Platform::Unknown),
            other => Err(SchedulerError::InvalidInput(format!(
                "unknown platform '{other}'"
            ))),
        }
    }
}

/// Validated job target: an absolute `http` or `https` URL.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobTarget(Url);

impl JobTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|e| {
            SchedulerError::InvalidInput(format!("invalid target URL '{trimmed}': {e}"))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            scheme => Err(SchedulerError::InvalidInput(format!(
                "target URL must use http or https, got '{scheme}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn platform(&self) -> Platform {
        Platform::detect(&self.0)
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for JobTarget {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self> {
        JobTarget::parse(&value)
    }
}

impl From<JobTarget> for String {
    fn from(value: JobTarget) -> Self {
        value.0.into()
    }
}

/// Producer input for a new job. Everything the worker needs later is
/// validated here, never deep inside a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewJob {
    pub target: JobTarget,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NewJob {
    pub fn new(target: JobTarget) -> Self {
        Self {
            target,
            job_title: None,
            company_name: None,
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn parse(raw_target: &str) -> Result<Self> {
        Ok(Self::new(JobTarget::parse(raw_target)?))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.job_title = Some(title.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company_name = Some(company.into());
        self
    }

    /// Trims optional labels, dropping the ones left empty.
    pub fn normalized(mut self) -> Self {
        self.job_title = non_empty(self.job_title);
        self.company_name = non_empty(self.company_name);
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Persisted job row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub target: JobTarget,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub detected_platform: Platform,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
    pub last_status_message: Option<String>,
    pub result_artifact_path: Option<String>,
}

impl JobRecord {
    /// Builds the initial `queued` row for a producer submission.
    pub fn from_new(job: NewJob, now: DateTime<Utc>) -> Self {
        let job = job.normalized();
        Self {
            id: JobId::new(),
            detected_platform: job.target.platform(),
            target: job.target,
            job_title: job.job_title,
            company_name: job.company_name,
            status: JobStatus::Queued,
            priority: job.priority,
            retry_count: 0,
            max_retries: job.max_retries,
            created_at: now,
            last_attempted_at: None,
            ended_at: None,
            error_details: None,
            last_status_message: None,
            result_artifact_path: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_rejects_non_http_schemes() {
        assert!(JobTarget::parse("ftp://example.com/job").is_err());
        assert!(JobTarget::parse("not a url").is_err());
        assert!(JobTarget::parse("  https://example.com/jobs/1  ").is_ok());
    }

    #[test]
    fn platform_detection_uses_host() {
        let cases = [
            ("https://acme.wd1.myworkdayjobs.com/en-US/careers/job/1", Platform::Workday),
            ("https://boards.greenhouse.io/acme/jobs/42", Platform::Greenhouse),
            ("https://jobs.lever.co/acme/abc", Platform::Lever),
            ("https://careers.example.com/greenhouse.io", Platform::Unknown),
        ];
        for (raw, expected) in cases {
            let target = JobTarget::parse(raw).expect("valid url");
            assert_eq!(target.platform(), expected, "{raw}");
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::PendingReview.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::FailedFinal.is_terminal());
    }

    #[test]
    fn status_parses_its_own_labels() {
        for status in JobStatus::all() {
            assert_eq!(status.as_str().parse::<JobStatus>().expect("parse"), *status);
        }
        assert!("failed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn new_job_deserializes_with_defaults() {
        let job: NewJob = serde_json::from_value(serde_json::json!({
            "target": "https://jobs.lever.co/acme/1",
            "job_title": "   ",
        }))
        .expect("deserialize");
        let job = job.normalized();
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(job.job_title, None);

        let bad = serde_json::from_value::<NewJob>(serde_json::json!({
            "target": "mailto:someone@example.com",
        }));
        assert!(bad.is_err());
    }
}
