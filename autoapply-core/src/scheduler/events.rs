use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::job::JobId;
use crate::error::{Result, SchedulerError};

/// Severity attached to every job event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
    Success,
    Pending,
    Critical,
}

impl EventLevel {
    /// Label used in storage and in `last_status_message`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
            EventLevel::Success => "SUCCESS",
            EventLevel::Pending => "PENDING",
            EventLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLevel {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(EventLevel::Debug),
            "INFO" => Ok(EventLevel::Info),
            "WARN" | "WARNING" => Ok(EventLevel::Warn),
            "ERROR" => Ok(EventLevel::Error),
            "SUCCESS" => Ok(EventLevel::Success),
            "PENDING" => Ok(EventLevel::Pending),
            "CRITICAL" => Ok(EventLevel::Critical),
            other => Err(SchedulerError::InvalidInput(format!(
                "unknown event level '{other}'"
            ))),
        }
    }
}

/// Event about to be appended to a job's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobEvent {
    pub level: EventLevel,
    pub message: String,
    pub artifact_path: Option<String>,
}

impl NewJobEvent {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            artifact_path: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, message)
    }

    pub fn with_artifact(mut self, artifact_path: Option<String>) -> Self {
        self.artifact_path = artifact_path;
        self
    }

    /// Summary written to the owning job's `last_status_message`.
    pub fn status_line(&self) -> String {
        format!("[{}] {}", self.level, self.message)
    }
}

/// Immutable, timestamped record of something that happened to a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    pub artifact_path: Option<String>,
}

impl JobEvent {
    /// The `last_status_message` this event left on its job.
    pub fn status_line(&self) -> String {
        format!("[{}] {}", self.level, self.message)
    }
}

/// Message recorded when the dispatcher promotes a job to `processing`.
pub(crate) const PROMOTION_MESSAGE: &str = "Picked up by dispatcher; promoted to processing";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_carries_level_prefix() {
        let event = NewJobEvent::warn("retrying");
        assert_eq!(event.status_line(), "[WARN] retrying");

        let stored = JobEvent {
            id: 1,
            job_id: JobId::new(),
            timestamp: Utc::now(),
            level: event.level,
            message: event.message.clone(),
            artifact_path: None,
        };
        assert_eq!(stored.status_line(), event.status_line());
    }

    #[test]
    fn level_parse_is_case_insensitive() {
        assert_eq!("critical".parse::<EventLevel>().expect("parse"), EventLevel::Critical);
        assert_eq!("WARNING".parse::<EventLevel>().expect("parse"), EventLevel::Warn);
        assert!("loud".parse::<EventLevel>().is_err());
    }
}
