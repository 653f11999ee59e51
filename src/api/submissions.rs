use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::jobs::{JobRequest, NewJob, SubmissionPayload, UpscalePayload};
use crate::schemas::job::{EnqueueResponse, RegradeRequest, SubmissionJobsResponse, UpscaleRequest};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:submission_id/grade", post(grade_submission))
        .route("/:submission_id/regrade", post(regrade_submission))
        .route("/:submission_id/upscale", post(upscale_submission))
        .route("/:submission_id/jobs", get(list_submission_jobs))
}

async fn grade_submission(
    Path(submission_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let request =
        JobRequest::GradeSubmission(SubmissionPayload { submission_id, clarification_text: None });
    let job_id = state.pipeline().jobs.enqueue_unique(NewJob::new(request)).await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::queued(job_id))))
}

async fn regrade_submission(
    Path(submission_id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<RegradeRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = JobRequest::RegradeSubmission(SubmissionPayload {
        submission_id,
        clarification_text: Some(payload.clarify),
    });
    let job_id = state.pipeline().jobs.enqueue(NewJob::new(request)).await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::queued(job_id))))
}

async fn upscale_submission(
    Path(submission_id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<UpscaleRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = JobRequest::UpscaleSubmission(UpscalePayload {
        submission_id,
        image_paths: payload.image_paths,
    });
    let job_id = state.pipeline().jobs.enqueue(NewJob::new(request)).await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::queued(job_id))))
}

/// Every job routed to the submission, with per-status counts. Clients
/// poll this while `outstanding` is true.
async fn list_submission_jobs(
    Path(submission_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<SubmissionJobsResponse>, ApiError> {
    let jobs = state.pipeline().jobs.list_by_submission(submission_id).await?;
    Ok(Json(SubmissionJobsResponse::new(submission_id, jobs)))
}
