use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use autoapply_core::SchedulerError;
use autoapply_core::scheduler::{
    AdapterError, AdapterOutcome, ApplicantContext, ExecutionAdapter, ExecutionRequest,
    InMemoryJobStore, JobEvent, JobId, JobRecord, JobStatus, JobStore, NewJob, NewJobEvent,
    SchedulerConfig, SchedulerController, SchedulerDeps, StaticApplicantSource, Transition,
};
use autoapply_server::{AppState, create_app};

struct AlwaysSucceeds;

#[async_trait]
impl ExecutionAdapter for AlwaysSucceeds {
    async fn execute(&self, _request: &ExecutionRequest) -> Result<AdapterOutcome, AdapterError> {
        Ok(AdapterOutcome::Succeeded {
            artifact_path: Some("/tmp/confirmation.png".into()),
            message: Some("application sent".into()),
        })
    }
}

/// Delegates to an in-memory store but refuses the n-th submission.
struct FailingSubmitStore {
    inner: InMemoryJobStore,
    submits: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl JobStore for FailingSubmitStore {
    async fn submit(&self, job: NewJob) -> autoapply_core::Result<JobRecord> {
        if self.submits.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(SchedulerError::Internal("connection reset".into()));
        }
        self.inner.submit(job).await
    }

    async fn get(&self, id: JobId) -> autoapply_core::Result<JobRecord> {
        self.inner.get(id).await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> autoapply_core::Result<Vec<JobRecord>> {
        self.inner.list_jobs(status, limit).await
    }

    async fn count_processing(&self) -> autoapply_core::Result<u64> {
        self.inner.count_processing().await
    }

    async fn claim_eligible(&self, limit: usize) -> autoapply_core::Result<Vec<JobRecord>> {
        self.inner.claim_eligible(limit).await
    }

    async fn release_claim(&self, id: JobId, reason: &str) -> autoapply_core::Result<JobRecord> {
        self.inner.release_claim(id, reason).await
    }

    async fn apply_transition(
        &self,
        id: JobId,
        transition: &Transition,
    ) -> autoapply_core::Result<JobRecord> {
        self.inner.apply_transition(id, transition).await
    }

    async fn append_event(
        &self,
        id: JobId,
        event: NewJobEvent,
    ) -> autoapply_core::Result<JobEvent> {
        self.inner.append_event(id, event).await
    }

    async fn job_events(&self, id: JobId) -> autoapply_core::Result<Vec<JobEvent>> {
        self.inner.job_events(id).await
    }

    async fn recent_events(&self, limit: usize) -> autoapply_core::Result<Vec<JobEvent>> {
        self.inner.recent_events(limit).await
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        pool_size: 2,
        channel_capacity: 4,
        poll_interval_ms: 10,
        receive_timeout_ms: 20,
        dispatcher_join_grace_ms: 200,
        ..SchedulerConfig::default()
    }
}

fn app_with_store(store: Arc<dyn JobStore>) -> Router {
    let scheduler = Arc::new(SchedulerController::new(
        SchedulerDeps {
            store: Arc::clone(&store),
            adapter: Arc::new(AlwaysSucceeds),
            applicants: Arc::new(StaticApplicantSource::new(ApplicantContext::default())),
        },
        fast_config(),
    ));
    create_app(AppState::new(store, scheduler))
}

fn test_app() -> (Router, Arc<InMemoryJobStore>) {
    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = Arc::new(SchedulerController::new(
        SchedulerDeps {
            store: store.clone(),
            adapter: Arc::new(AlwaysSucceeds),
            applicants: Arc::new(StaticApplicantSource::new(ApplicantContext::default())),
        },
        fast_config(),
    ));
    let app = create_app(AppState::new(store.clone(), scheduler));
    (app, store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn submit_splits_lines_and_reports_skipped_targets() {
    let (app, store) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({
            "urls": "https://boards.greenhouse.io/acme/jobs/1\n\n  https://jobs.lever.co/acme/2  \nftp://example.com/job\n",
            "priority": 3
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let created = body["created"].as_array().expect("created");
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["status"], "queued");
    assert_eq!(created[0]["priority"], 3);
    assert_eq!(created[0]["detected_platform"], "Greenhouse");
    assert_eq!(created[1]["detected_platform"], "Lever");

    let skipped = body["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["input"], "ftp://example.com/job");

    assert_eq!(store.list_jobs(None, 10).await.expect("list").len(), 2);
}

#[tokio::test]
async fn submit_accepts_structured_jobs() {
    let (app, _store) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({
            "jobs": [{
                "target": "https://acme.wd1.myworkdayjobs.com/careers/job/7",
                "job_title": "  Platform Engineer ",
                "company_name": "",
                "max_retries": 5
            }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let job = &body["created"][0];
    assert_eq!(job["job_title"], "Platform Engineer");
    assert!(job["company_name"].is_null());
    assert_eq!(job["max_retries"], 5);
    assert_eq!(job["priority"], 10);
    assert_eq!(job["detected_platform"], "Workday");
}

#[tokio::test]
async fn store_failure_mid_batch_is_reported_per_entry() {
    let store = Arc::new(FailingSubmitStore {
        inner: InMemoryJobStore::new(),
        submits: AtomicUsize::new(0),
        fail_on: 2,
    });
    let app = app_with_store(store.clone());

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({
            "urls": "https://example.com/a\nhttps://example.com/b\nhttps://example.com/c"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"].as_array().expect("created").len(), 2);
    let skipped = body["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["input"], "https://example.com/b");
    assert!(
        skipped[0]["reason"]
            .as_str()
            .expect("reason")
            .contains("connection reset")
    );
    assert_eq!(store.inner.list_jobs(None, 10).await.expect("list").len(), 2);
}

#[tokio::test]
async fn store_failure_with_nothing_created_is_an_error() {
    let store = Arc::new(InMemoryJobStore::new());
    store.set_unavailable(true);
    let app = app_with_store(store);

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "urls": "https://example.com/a" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["status"], 500);
}

#[tokio::test]
async fn empty_submission_is_a_bad_request() {
    let (app, _store) = test_app();

    let (status, body) = send(&app, "POST", "/api/jobs", Some(json!({ "urls": "\n  \n" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let (app, _store) = test_app();

    let missing = uuid_like();
    let (status, body) = send(&app, "GET", &format!("/api/jobs/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);

    let (status, _) = send(&app, "GET", "/api/jobs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", &format!("/api/jobs/{missing}/events"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn uuid_like() -> String {
    autoapply_core::scheduler::JobId::new().to_string()
}

#[tokio::test]
async fn list_filters_by_status() {
    let (app, store) = test_app();
    for i in 0..3 {
        store
            .submit(NewJob::parse(&format!("https://example.com/jobs/{i}")).expect("url"))
            .await
            .expect("submit");
    }
    store.claim_eligible(1).await.expect("claim");

    let (status, body) = send(&app, "GET", "/api/jobs?status=queued&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = send(&app, "GET", "/api/jobs?status=processing", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = send(&app, "GET", "/api/jobs?status=paused", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scheduler_controls_are_idempotent_and_run_jobs() {
    let (app, store) = test_app();
    let job = store
        .submit(NewJob::parse("https://jobs.lever.co/acme/run").expect("url"))
        .await
        .expect("submit");

    let (status, body) = send(&app, "GET", "/api/scheduler/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopped");

    let (_, body) = send(&app, "POST", "/api/scheduler/start", None).await;
    assert_eq!(body["result"], "started");
    assert_eq!(body["status"]["state"], "running");
    assert_eq!(body["status"]["worker_count"], 2);

    let (_, body) = send(&app, "POST", "/api/scheduler/start", None).await;
    assert_eq!(body["result"], "already_running");

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, body) = send(&app, "GET", &format!("/api/jobs/{}", job.id), None).await;
            if body["status"] == "succeeded" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job succeeds");

    let (_, body) = send(&app, "POST", "/api/scheduler/stop", None).await;
    assert_eq!(body["result"]["outcome"], "stopped");
    assert_eq!(body["status"]["state"], "stopped");

    let (_, body) = send(&app, "POST", "/api/scheduler/stop", None).await;
    assert_eq!(body["result"]["outcome"], "not_running");

    let (status, body) = send(&app, "GET", &format!("/api/jobs/{}/events", job.id), None).await;
    assert_eq!(status, StatusCode::OK);
    let levels: Vec<&str> = body["events"]
        .as_array()
        .expect("events")
        .iter()
        .map(|e| e["level"].as_str().expect("level"))
        .collect();
    assert_eq!(levels, vec!["info", "info", "success"]);

    let (_, body) = send(&app, "GET", "/api/events", None).await;
    assert_eq!(body["count"], 3);

    let (_, body) = send(&app, "GET", "/api/events?limit=1", None).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["level"], "success");
}

#[tokio::test]
async fn health_reflects_store_availability() {
    let (app, store) = test_app();

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["scheduler"], "stopped");

    store.set_unavailable(true);
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}
