use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use autoapply_core::scheduler::{
    DEFAULT_RECENT_EVENTS, JobEvent, SchedulerStatus, StartOutcome, StopOutcome,
};

use super::jobs::clamp_limit;
use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize)]
pub struct SchedulerCommandResponse<T> {
    pub result: T,
    pub status: SchedulerStatus,
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecentEventsResponse {
    pub events: Vec<JobEvent>,
    pub count: usize,
}

pub async fn start_scheduler_handler(
    State(state): State<AppState>,
) -> AppResult<Json<SchedulerCommandResponse<StartOutcome>>> {
    let result = state.scheduler().start().await?;
    let status = state.scheduler().status().await;
    Ok(Json(SchedulerCommandResponse { result, status }))
}

pub async fn stop_scheduler_handler(
    State(state): State<AppState>,
) -> Json<SchedulerCommandResponse<StopOutcome>> {
    let result = state.scheduler().stop().await;
    let status = state.scheduler().status().await;
    Json(SchedulerCommandResponse { result, status })
}

pub async fn scheduler_status_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler().status().await)
}

/// Newest first across all jobs.
pub async fn recent_events_handler(
    State(state): State<AppState>,
    Query(query): Query<RecentEventsQuery>,
) -> AppResult<Json<RecentEventsResponse>> {
    let events = state
        .store()
        .recent_events(clamp_limit(Some(query.limit.unwrap_or(DEFAULT_RECENT_EVENTS))))
        .await?;
    Ok(Json(RecentEventsResponse {
        count: events.len(),
        events,
    }))
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.scheduler().status().await;

    match state.store().count_processing().await {
        Ok(in_flight) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION"),
                "checks": {
                    "store": { "status": "healthy", "processing": in_flight },
                    "scheduler": scheduler.state,
                }
            })),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION"),
                "checks": {
                    "store": { "status": "unhealthy", "error": err.to_string() },
                    "scheduler": scheduler.state,
                }
            })),
        ),
    }
}
