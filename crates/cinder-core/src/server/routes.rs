//! HTTP handlers for the job API.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use cinder_training::{TrainingJobId, TrainingRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::errors::ApiError;
use crate::jobs::{JobOrchestrator, JobStatus, JobView, DEFAULT_LOG_TAIL, MAX_LOG_TAIL};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    /// Externally reachable base URL used to build `status_url`.
    pub public_url: Option<Arc<str>>,
}

impl AppState {
    fn status_url(&self, job_id: &TrainingJobId) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/api/status/{}", base.trim_end_matches('/'), job_id))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "provider": state.orchestrator.provider_kind() }))
}

/// Body of a successful submit: the job plus where to poll it.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub job: JobView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<TrainingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload?;
    let job = state.orchestrator.submit(request).await?;
    let status_url = state.status_url(&job.job_id);
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job, status_url })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let view = state.orchestrator.get_status(&TrainingJobId(job_id)).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Kept as text so that a malformed value falls back to the default.
    pub tail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub job_id: TrainingJobId,
    pub logs: String,
    pub tail: usize,
}

fn parse_tail(raw: Option<&str>) -> usize {
    raw.and_then(|t| t.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LOG_TAIL)
        .clamp(1, MAX_LOG_TAIL)
}

pub async fn logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let job_id = TrainingJobId(job_id);
    let tail = parse_tail(query.tail.as_deref());
    let logs = state.orchestrator.get_logs(&job_id, Some(tail)).await?;
    Ok(Json(LogsResponse { job_id, logs, tail }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub job_id: TrainingJobId,
    pub status: JobStatus,
    pub message: String,
}

pub async fn cleanup(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let view = state.orchestrator.cleanup(&TrainingJobId(job_id)).await?;
    let message = if view.resource_released {
        "compute unit released"
    } else {
        "no compute unit to release"
    };
    Ok(Json(CleanupResponse { job_id: view.job_id, status: view.status, message: message.to_string() }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobView>,
}

pub async fn list(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse { jobs: state.orchestrator.list().await })
}
