//! Job routes: `/jobs/*`
//!
//! Submit work to an engine, poll its status, list and cancel jobs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use iacforge_core::job::{ErrorDetail, Job, JobKind, JobRequest, JobStatus};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/jobs` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/cancel", post(cancel_job))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub dedup_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub deduplicated: bool,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_artifact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            result_artifact_id: job.result_artifact_id,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Queue a job. Returns before any engine work starts.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    let request: JobRequest = serde_json::from_value(serde_json::json!({
        "kind": body.kind,
        "input": body.input,
    }))
    .map_err(|e| AppError::BadRequest {
        code: "input",
        message: format!("invalid job request: {e}"),
    })?;

    let dedup_key = body.dedup_key.filter(|k| !k.trim().is_empty());
    let submitted = state.executor.submit(request, dedup_key).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: submitted.job_id,
            deduplicated: submitted.deduplicated,
        }),
    ))
}

/// List all jobs, newest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<JobListResponse>, AppError> {
    let jobs = state.executor.list().await?;
    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.executor.status(&id).await?;
    Ok(Json(job.into()))
}

/// Cancel a queued or running job. Terminal jobs answer `409`.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let job = state.executor.cancel(&id).await?;
    info!(job_id = %job.id, "job cancelled via API");
    Ok(Json(CancelResponse {
        job_id: job.id,
        status: job.status,
    }))
}
