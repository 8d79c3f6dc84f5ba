//! Execution adapter that hands each job to an external automation command.
//!
//! The request is written to the child's stdin as one JSON document. The
//! child reports back with a JSON object on the last non-empty line of its
//! stdout:
//!
//! ```json
//! {"status": "succeeded", "message": "submitted", "artifact": "/srv/shots/confirm.png"}
//! ```
//!
//! `status` is one of `succeeded`, `pending_review` or `failed`. Anything the
//! child prints before that line is treated as log output.

use async_trait::async_trait;
use serde::Deserialize;
use std::{process::Stdio, time::Duration};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

use autoapply_core::scheduler::{AdapterError, AdapterOutcome, ExecutionAdapter, ExecutionRequest};

use crate::infra::config::AdapterConfig;

const STDERR_TAIL_BYTES: usize = 2_048;

#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProcessReport {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    artifact: Option<String>,
}

impl ProcessAdapter {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &AdapterConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|command| Self::new(command.clone(), config.args.clone(), config.timeout))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn parse_report(stdout: &[u8]) -> Result<AdapterOutcome, AdapterError> {
        let stdout = String::from_utf8_lossy(stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| AdapterError::Protocol("automation produced no output".into()))?;

        let report: ProcessReport = serde_json::from_str(line)
            .map_err(|e| AdapterError::Protocol(format!("unparseable result line: {e}")))?;

        match report.status.as_str() {
            "succeeded" | "success" => Ok(AdapterOutcome::Succeeded {
                artifact_path: report.artifact,
                message: report.message,
            }),
            "pending_review" => Ok(AdapterOutcome::PendingReview {
                artifact_path: report.artifact,
                message: report.message,
            }),
            "failed" | "failure" => Ok(AdapterOutcome::Failed {
                detail: report
                    .error
                    .or(report.message)
                    .unwrap_or_else(|| "automation reported failure".to_string()),
            }),
            other => Err(AdapterError::Protocol(format!("unknown status '{other}'"))),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL_BYTES);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[async_trait]
impl ExecutionAdapter for ProcessAdapter {
    async fn execute(&self, request: &ExecutionRequest) -> Result<AdapterOutcome, AdapterError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| AdapterError::Protocol(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AdapterError::Spawn)?;
        debug!(job_id = %request.job_id, pid = ?child.id(), command = %self.command, "automation started");

        let stdin = child.stdin.take();
        let job_id = request.job_id;
        // The write shares the deadline with the wait: a child that never
        // drains a large request must still time out.
        let run = async move {
            let write = async move {
                if let Some(mut stdin) = stdin
                    && let Err(err) = stdin.write_all(&payload).await
                {
                    // The child may legitimately exit without reading its input.
                    warn!(job_id = %job_id, error = %err, "failed to write request to automation");
                }
            };
            let ((), output) = tokio::join!(write, child.wait_with_output());
            output
        };

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(AdapterError::Spawn)?,
            Err(_) => return Err(AdapterError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(AdapterError::ExitStatus {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Self::parse_report(&output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use autoapply_core::scheduler::{
        ApplicantContext, ApplicantProfile, JobId, JobRecord, NewJob,
    };
    use chrono::Utc;

    fn request() -> ExecutionRequest {
        let job = JobRecord::from_new(
            NewJob::parse("https://jobs.lever.co/acme/123").expect("url"),
            Utc::now(),
        );
        ExecutionRequest::for_job(&job, ApplicantContext::default())
    }

    fn shell(script: &str, timeout: Duration) -> ProcessAdapter {
        ProcessAdapter::new("sh", vec!["-c".into(), script.into()], timeout)
    }

    #[tokio::test]
    async fn reads_result_from_last_stdout_line() {
        let adapter = shell(
            r#"cat > /dev/null; echo "filling form"; echo '{"status":"succeeded","artifact":"/tmp/done.png"}'"#,
            Duration::from_secs(5),
        );
        let outcome = adapter.execute(&request()).await.expect("outcome");
        assert_eq!(
            outcome,
            AdapterOutcome::Succeeded {
                artifact_path: Some("/tmp/done.png".into()),
                message: None,
            }
        );
    }

    #[tokio::test]
    async fn request_is_sent_on_stdin() {
        let adapter = shell(
            r#"grep -q '"attempt":1' && echo '{"status":"pending_review","message":"captcha"}'"#,
            Duration::from_secs(5),
        );
        let outcome = adapter.execute(&request()).await.expect("outcome");
        assert!(matches!(outcome, AdapterOutcome::PendingReview { .. }));
    }

    #[tokio::test]
    async fn reported_failure_is_an_outcome() {
        let adapter = shell(
            r#"cat > /dev/null; echo '{"status":"failed","error":"login wall"}'"#,
            Duration::from_secs(5),
        );
        let outcome = adapter.execute(&request()).await.expect("outcome");
        assert_eq!(outcome, AdapterOutcome::failed("login wall"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let adapter = shell("cat > /dev/null; echo boom >&2; exit 3", Duration::from_secs(5));
        match adapter.execute(&request()).await {
            Err(AdapterError::ExitStatus { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let adapter = shell("sleep 5", Duration::from_millis(100));
        assert!(matches!(
            adapter.execute(&request()).await,
            Err(AdapterError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn undrained_large_request_still_times_out() {
        let answers = (0..2_000).map(|i| (format!("question {i}"), "x".repeat(100)));
        let job = JobRecord::from_new(
            NewJob::parse("https://boards.greenhouse.io/acme/jobs/9").expect("url"),
            Utc::now(),
        );
        let request = ExecutionRequest::for_job(
            &job,
            ApplicantContext::new(ApplicantProfile::default(), answers),
        );
        assert!(serde_json::to_vec(&request).expect("encode").len() > 64 * 1024);

        let adapter = shell("sleep 4", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = adapter.execute(&request).await;
        assert!(
            matches!(result, Err(AdapterError::Timeout(_))),
            "unexpected result: {result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn garbage_output_is_a_protocol_error() {
        let adapter = shell("cat > /dev/null; echo 'not json'", Duration::from_secs(5));
        assert!(matches!(
            adapter.execute(&request()).await,
            Err(AdapterError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let adapter = ProcessAdapter::new(
            format!("/nonexistent/{}", JobId::new()),
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            adapter.execute(&request()).await,
            Err(AdapterError::Spawn(_))
        ));
    }
}
