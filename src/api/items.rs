use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::grading::GradingItem;
use crate::jobs::{JobRequest, NewJob};
use crate::schemas::job::{EnqueueResponse, GradingResponse, ItemJobsResponse, RegradeRequest};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:item_id/grade", post(grade_item))
        .route("/:item_id/regrade", post(regrade_item))
        .route("/:item_id/grading", get(get_grading))
        .route("/:item_id/jobs", get(list_item_jobs))
}

async fn find_item(state: &AppState, item_id: i64) -> Result<GradingItem, ApiError> {
    state
        .pipeline()
        .catalog
        .find_item(item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission item {item_id} not found")))
}

/// Queue grading unless a grading of this item is already outstanding.
async fn grade_item(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let item = find_item(&state, item_id).await?;

    let job = NewJob::new(JobRequest::grade_item(item.id)).in_submission(item.submission_id);
    let job_id = state.pipeline().jobs.enqueue_unique(job).await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::queued(job_id))))
}

/// Every regrade is a fresh job: the clarification may differ each time.
async fn regrade_item(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<RegradeRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let item = find_item(&state, item_id).await?;

    let job = NewJob::new(JobRequest::regrade_item(item.id, payload.clarify))
        .in_submission(item.submission_id);
    let job_id = state.pipeline().jobs.enqueue(job).await?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse::queued(job_id))))
}

async fn get_grading(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<GradingResponse>, ApiError> {
    let record = state
        .pipeline()
        .gradings
        .find_by_item(item_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission item {item_id} is not graded")))?;

    Ok(Json(GradingResponse::from(record)))
}

/// Grade and regrade jobs for one item, oldest first.
async fn list_item_jobs(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<ItemJobsResponse>, ApiError> {
    let jobs = state.pipeline().jobs.list_by_item(item_id).await?;
    Ok(Json(ItemJobsResponse::new(item_id, jobs)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::grading::GradingStore;
    use crate::jobs::{JobRequest, JobStore, NewJob};
    use crate::test_support::{json_request, read_json, setup_test_context, sign_error_verdict};

    #[tokio::test]
    async fn grade_reuses_an_outstanding_job() {
        let ctx = setup_test_context().await;
        ctx.memory.catalog.add_item(42, 7);

        let first = ctx
            .app
            .clone()
            .oneshot(json_request(Method::POST, "/api/v1/items/42/grade", None))
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first = read_json(first).await;
        assert_eq!(first["status"], "queued");

        let second = ctx
            .app
            .oneshot(json_request(Method::POST, "/api/v1/items/42/grade", None))
            .await
            .expect("response");
        let second = read_json(second).await;

        assert_eq!(first["job_id"], second["job_id"]);
        assert_eq!(ctx.memory.jobs.len(), 1);
        let job_id = first["job_id"].as_i64().expect("job id");
        let job = ctx.memory.jobs.find(job_id).await.expect("find").expect("job");
        assert_eq!(job.submission_id, Some(7));
    }

    #[tokio::test]
    async fn grade_of_unknown_item_is_not_found() {
        let ctx = setup_test_context().await;

        let response = ctx
            .app
            .oneshot(json_request(Method::POST, "/api/v1/items/5/grade", None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(ctx.memory.jobs.len(), 0);
    }

    #[tokio::test]
    async fn regrade_requires_clarification() {
        let ctx = setup_test_context().await;
        ctx.memory.catalog.add_item(42, 7);

        let response = ctx
            .app
            .oneshot(json_request(Method::POST, "/api/v1/items/42/regrade", Some(json!({"clarify": ""}))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn regrade_always_creates_a_new_job() {
        let ctx = setup_test_context().await;
        ctx.memory.catalog.add_item(42, 7);

        for _ in 0..2 {
            let response = ctx
                .app
                .clone()
                .oneshot(json_request(
                    Method::POST,
                    "/api/v1/items/42/regrade",
                    Some(json!({"clarify": "units are in cm"})),
                ))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        let jobs = ctx.memory.jobs.list_by_item(42).await.expect("list");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].payload.0["clarification_text"], "units are in cm");
    }

    #[tokio::test]
    async fn grading_is_served_once_stored() {
        let ctx = setup_test_context().await;

        let missing = ctx
            .app
            .clone()
            .oneshot(json_request(Method::GET, "/api/v1/items/42/grading", None))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let job_id = ctx
            .memory
            .jobs
            .enqueue(NewJob::new(JobRequest::grade_item(42)))
            .await
            .expect("enqueue");
        ctx.memory.jobs.claim_next("worker-a").await.expect("claim");
        ctx.memory
            .gradings
            .upsert(42, &sign_error_verdict(), None, job_id)
            .await
            .expect("upsert")
            .expect("job is running");
        let response = ctx
            .app
            .oneshot(json_request(Method::GET, "/api/v1/items/42/grading", None))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["is_correct"], false);
        assert_eq!(body["critical_errors"][0]["description"], "sign error");
        assert_eq!(body["job_id"], job_id);
    }

    #[tokio::test]
    async fn item_jobs_report_outstanding_work() {
        let ctx = setup_test_context().await;
        ctx.memory.catalog.add_item(42, 7);
        ctx.memory.catalog.add_item(43, 7);

        for uri in ["/api/v1/items/42/grade", "/api/v1/items/43/grade"] {
            let response =
                ctx.app.clone().oneshot(json_request(Method::POST, uri, None)).await.expect("response");
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        let claimed = ctx.memory.jobs.claim_next("worker-a").await.expect("claim").expect("job");
        ctx.memory.jobs.mark_running(claimed.id).await.expect("running");
        ctx.memory.jobs.mark_succeeded(claimed.id, json!({"grading_id": 1})).await.expect("succeeded");

        let response = ctx
            .app
            .clone()
            .oneshot(json_request(Method::GET, "/api/v1/items/42/jobs", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["submission_item_id"], 42);
        assert_eq!(body["outstanding"], false);
        assert_eq!(body["counts"]["succeeded"], 1);
        assert_eq!(body["jobs"].as_array().map(Vec::len), Some(1));

        let other = ctx
            .app
            .oneshot(json_request(Method::GET, "/api/v1/items/43/jobs", None))
            .await
            .expect("response");
        let other = read_json(other).await;
        assert_eq!(other["outstanding"], true);
        assert_eq!(other["counts"]["pending"], 1);
    }
}
