//! Contract between the scheduler and the component that performs the actual
//! automation for one job.
//!
//! The scheduler treats the adapter as an opaque, possibly slow, possibly
//! failing black box. A reported [`AdapterOutcome::Failed`] is a domain
//! failure; an `Err(AdapterError)` or a panic inside `execute` is a crash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;

use super::job::{JobId, JobRecord, JobTarget, Platform};
use crate::error::Result;

/// How the automation should handle account creation on a target site.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordStrategy {
    #[default]
    Generate,
    Ask,
}

/// Applicant details handed to every execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub resume_path: Option<String>,
    pub linkedin_url: Option<String>,
    pub website_url: Option<String>,
    pub default_email: Option<String>,
    #[serde(default)]
    pub password_strategy: PasswordStrategy,
}

/// Profile plus canned answers, keyed by normalised question text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantContext {
    pub profile: ApplicantProfile,
    pub standard_answers: BTreeMap<String, String>,
}

impl ApplicantContext {
    pub fn new<I, Q, A>(profile: ApplicantProfile, answers: I) -> Self
    where
        I: IntoIterator<Item = (Q, A)>,
        Q: AsRef<str>,
        A: Into<String>,
    {
        let standard_answers = answers
            .into_iter()
            .map(|(question, answer)| (normalize_question(question.as_ref()), answer.into()))
            .collect();
        Self {
            profile,
            standard_answers,
        }
    }

    pub fn answer_for(&self, question: &str) -> Option<&str> {
        self.standard_answers
            .get(&normalize_question(question))
            .map(String::as_str)
    }
}

fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

/// Source of the applicant context loaded before each execution.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicantSource: Send + Sync {
    /// `Ok(None)` means no profile has been configured yet.
    async fn load(&self) -> Result<Option<ApplicantContext>>;
}

/// Fixed applicant context, used in tests and development mode.
#[derive(Clone, Debug, Default)]
pub struct StaticApplicantSource {
    context: Option<ApplicantContext>,
}

impl StaticApplicantSource {
    pub fn new(context: ApplicantContext) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn empty() -> Self {
        Self { context: None }
    }
}

#[async_trait]
impl ApplicantSource for StaticApplicantSource {
    async fn load(&self) -> Result<Option<ApplicantContext>> {
        Ok(self.context.clone())
    }
}

/// Everything an adapter needs to run one attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    pub target: JobTarget,
    pub platform: Platform,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
    pub applicant: ApplicantContext,
}

impl ExecutionRequest {
    pub fn for_job(job: &JobRecord, applicant: ApplicantContext) -> Self {
        Self {
            job_id: job.id,
            target: job.target.clone(),
            platform: job.detected_platform,
            job_title: job.job_title.clone(),
            company_name: job.company_name.clone(),
            attempt: job.retry_count + 1,
            applicant,
        }
    }
}

/// Result reported by an adapter that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdapterOutcome {
    Succeeded {
        #[serde(default)]
        artifact_path: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    PendingReview {
        #[serde(default)]
        artifact_path: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Failed {
        detail: String,
    },
}

impl AdapterOutcome {
    pub fn succeeded() -> Self {
        AdapterOutcome::Succeeded {
            artifact_path: None,
            message: None,
        }
    }

    pub fn pending_review(artifact_path: Option<String>) -> Self {
        AdapterOutcome::PendingReview {
            artifact_path,
            message: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        AdapterOutcome::Failed {
            detail: detail.into(),
        }
    }
}

/// Unexpected adapter failure, as opposed to a reported [`AdapterOutcome::Failed`].
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("failed to launch automation: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("automation timed out after {0:?}")]
    Timeout(Duration),

    #[error("automation exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("automation protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

/// Performs the domain-specific automation for one job.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<AdapterOutcome, AdapterError>;
}
