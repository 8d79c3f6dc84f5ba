use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{jobs, scheduler},
    infra::app_state::AppState,
};

/// Routes served under `/api`.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/jobs",
            post(jobs::submit_jobs_handler).get(jobs::list_jobs_handler),
        )
        .route("/jobs/{id}", get(jobs::get_job_handler))
        .route("/jobs/{id}/events", get(jobs::job_events_handler))
        .route("/events", get(scheduler::recent_events_handler))
        .route("/scheduler/start", post(scheduler::start_scheduler_handler))
        .route("/scheduler/stop", post(scheduler::stop_scheduler_handler))
        .route("/scheduler/status", get(scheduler::scheduler_status_handler))
}

pub fn create_app(state: AppState) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(scheduler::health_handler))
        .nest("/api", create_api_router())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
