use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Job;
use crate::db::types::{JobKind, JobStatus};
use crate::jobs::JobFailure;

pub(crate) const COLUMNS: &str = "\
    id, kind, status, payload, result, error, attempts, parent_job_id, submission_id, \
    submission_item_id, claimed_by, created_at, started_at, finished_at, updated_at";

const RETURNING: &str = "\
    jobs.id, jobs.kind, jobs.status, jobs.payload, jobs.result, jobs.error, jobs.attempts, \
    jobs.parent_job_id, jobs.submission_id, jobs.submission_item_id, jobs.claimed_by, \
    jobs.created_at, jobs.started_at, jobs.finished_at, jobs.updated_at";

pub(crate) struct InsertJob<'a> {
    pub(crate) kind: JobKind,
    pub(crate) payload: serde_json::Value,
    pub(crate) parent_job_id: Option<i64>,
    pub(crate) submission_id: Option<i64>,
    pub(crate) submission_item_id: Option<i64>,
    pub(crate) dedup_key: Option<&'a str>,
    pub(crate) now: PrimitiveDateTime,
}

/// Insert a pending job. With a `dedup_key` the insert is skipped (`None`)
/// when an active job with the same kind and key already exists.
pub(crate) async fn insert(pool: &PgPool, params: InsertJob<'_>) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "INSERT INTO jobs (
            kind, status, payload, attempts, parent_job_id, submission_id,
            submission_item_id, dedup_key, created_at, updated_at
         )
         VALUES ($1, $2, $3, 0, $4, $5, $6, $7, $8, $8)
         ON CONFLICT DO NOTHING
         RETURNING {COLUMNS}"
    ))
    .bind(params.kind)
    .bind(JobStatus::Pending)
    .bind(Json(params.payload))
    .bind(params.parent_job_id)
    .bind(params.submission_id)
    .bind(params.submission_item_id)
    .bind(params.dedup_key)
    .bind(params.now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_active_by_dedup_key(
    pool: &PgPool,
    kind: JobKind,
    dedup_key: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM jobs
         WHERE kind = $1 AND dedup_key = $2 AND status IN ($3, $4)
         ORDER BY id
         LIMIT 1",
    )
    .bind(kind)
    .bind(dedup_key)
    .bind(JobStatus::Pending)
    .bind(JobStatus::Running)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "WITH candidate AS (
            SELECT id
            FROM jobs
            WHERE status = $1
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs
        SET status = $2,
            claimed_by = $3,
            started_at = $4,
            updated_at = $4
        FROM candidate
        WHERE jobs.id = candidate.id
          AND jobs.status = $1
        RETURNING {RETURNING}"
    ))
    .bind(JobStatus::Pending)
    .bind(JobStatus::Running)
    .bind(worker_id)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_running(
    pool: &PgPool,
    job_id: i64,
    now: PrimitiveDateTime,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "UPDATE jobs
         SET attempts = attempts + 1,
             started_at = $3,
             updated_at = $3
         WHERE id = $1 AND status = $2
         RETURNING {COLUMNS}"
    ))
    .bind(job_id)
    .bind(JobStatus::Running)
    .bind(now)
    .fetch_optional(pool)
    .await
}

/// Move a running job to a terminal status. `None` when the job is not
/// currently running.
pub(crate) async fn finish(
    pool: &PgPool,
    job_id: i64,
    status: JobStatus,
    result: Option<serde_json::Value>,
    failure: Option<JobFailure>,
    now: PrimitiveDateTime,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "UPDATE jobs
         SET status = $2,
             result = $3,
             error = $4,
             finished_at = $5,
             updated_at = $5
         WHERE id = $1 AND status = $6
         RETURNING {COLUMNS}"
    ))
    .bind(job_id)
    .bind(status)
    .bind(result.map(Json))
    .bind(failure.map(Json))
    .bind(now)
    .bind(JobStatus::Running)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, job_id: i64) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_submission(
    pool: &PgPool,
    submission_id: i64,
) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE submission_id = $1 ORDER BY created_at, id"
    ))
    .bind(submission_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_item(
    pool: &PgPool,
    submission_item_id: i64,
) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE submission_item_id = $1 ORDER BY created_at, id"
    ))
    .bind(submission_item_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_stale_running(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {COLUMNS} FROM jobs
         WHERE status = $1 AND started_at IS NOT NULL AND started_at <= $2
         ORDER BY started_at, id"
    ))
    .bind(JobStatus::Running)
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
