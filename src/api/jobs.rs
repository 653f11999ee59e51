use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::job::JobResponse;

pub(crate) fn router() -> Router<AppState> {
    Router::new().route("/:job_id", get(get_job))
}

/// Authoritative job state; what the polling fallback reads.
async fn get_job(
    Path(job_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .pipeline()
        .jobs
        .find(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {job_id} not found")))?;

    Ok(Json(JobResponse::from(job)))
}
