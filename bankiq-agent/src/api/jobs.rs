//! Job API handlers
//!
//! POST /jobs, GET /jobs/{id}, GET /jobs/{id}/result, DELETE /jobs/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bankiq_common::{ErrorCode, JobError, JobStatus, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    jobs::{JobInput, ResultOutcome},
    AppState,
};

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub peer_banks: Vec<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub from: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub to: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub upload_id: Option<Uuid>,
}

impl From<SubmitJobRequest> for JobInput {
    fn from(request: SubmitJobRequest) -> Self {
        JobInput {
            prompt: request.prompt,
            session_id: request.session_id,
            bank: request.bank,
            peer_banks: request.peer_banks,
            metric: request.metric,
            form_type: request.form_type,
            from: request.from,
            to: request.to,
            upload_id: request.upload_id,
        }
    }
}

/// POST /jobs response
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// GET /jobs/{id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DELETE /jobs/{id} response
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// POST /jobs
///
/// Accept a unit of work. Returns 202 with the job id; the invocation runs
/// in the background and is observed via polling or the stream endpoints.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job_id = state
        .manager
        .submit(request.into())
        .await
        .map_err(|e| ApiError::BadRequest(e.message))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /jobs/{id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state
        .manager
        .status(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))?;

    tracing::debug!(job_id = %job_id, status = ?job.status, "Status query");

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        source: job.source_used,
        created_at: job.created_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
    }))
}

/// GET /jobs/{id}/result
///
/// Terminal results only: `{result}` for completed jobs, `{error}` for
/// failed or cancelled ones, 409 while the job is still in flight.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state
        .manager
        .result(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))?;

    match outcome {
        ResultOutcome::Completed(result) => Ok(Json(json!({ "result": result }))),
        ResultOutcome::Failed(error) => Ok(Json(json!({ "error": error }))),
        ResultOutcome::Cancelled => Ok(Json(json!({
            "error": JobError::new(ErrorCode::Cancelled, "job cancelled by client")
        }))),
        ResultOutcome::Pending(status) => Err(ApiError::Conflict(format!(
            "job is not terminal yet (status: {})",
            json!(status)
        ))),
    }
}

/// DELETE /jobs/{id}
///
/// Cancel a job. Cancelling a terminal job is an idempotent no-op that
/// reports `cancelled: false`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<CancelJobResponse>> {
    let cancelled = state
        .manager
        .cancel(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {job_id}")))?;

    Ok(Json(CancelJobResponse { job_id, cancelled }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job_status).delete(cancel_job))
        .route("/jobs/:job_id/result", get(get_job_result))
}
