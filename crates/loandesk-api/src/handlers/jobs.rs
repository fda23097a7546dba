//! Job submission, status, listing and cancellation.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use loandesk_jobs::{CancelOutcome, DocumentId, JobOptions, JobStatus, JobType};

use crate::error::ApiError;
use crate::AppState;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub document_ids: Vec<DocumentId>,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
}

pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let job_type: JobType = req.job_type.parse()?;

    let accepted = state.scheduler.submit(
        req.document_ids,
        job_type,
        req.options.unwrap_or_default(),
    )?;

    info!(
        job_id = %accepted.job_id,
        job_type = %accepted.job_type,
        document_count = accepted.document_count,
        "Job submitted via API"
    );
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.scheduler.get(id)?;
    Ok(Json(job))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()?;

    let jobs = state.scheduler.list(status);
    let stats = state.scheduler.stats();

    Ok(Json(serde_json::json!({
        "jobs": jobs,
        "total": stats.total_jobs,
        "pending": stats.pending,
        "processing": stats.processing,
    })))
}

pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.stats())
}

/// `202` when the request is accepted, `409` once the job is terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.scheduler.cancel(id)?;
    debug!(job_id = %id, outcome = ?outcome, "Cancel handled");

    let status = match outcome {
        CancelOutcome::Cancelled => JobStatus::Cancelled,
        _ => state
            .scheduler
            .get(id)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Cancelled),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "jobId": id,
            "status": status,
            "cancelRequested": true,
        })),
    ))
}
