use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::GradingRecord;
use crate::db::types::JobStatus;
use crate::grading::GradingVerdict;

pub(crate) const COLUMNS: &str = "\
    id, submission_item_id, is_correct, critical_errors, part_errors, partial_credit, \
    clarify_notes, job_id, graded_at, updated_at";

/// Single-statement upsert keyed by the unique `submission_item_id`.
/// `None` when job `job_id` is no longer running; the row is left as is.
pub(crate) async fn upsert(
    pool: &PgPool,
    submission_item_id: i64,
    verdict: &GradingVerdict,
    clarify_notes: Option<&str>,
    job_id: i64,
    now: PrimitiveDateTime,
) -> Result<Option<GradingRecord>, sqlx::Error> {
    sqlx::query_as::<_, GradingRecord>(&format!(
        "INSERT INTO gradings (
            submission_item_id, is_correct, critical_errors, part_errors, partial_credit,
            clarify_notes, job_id, graded_at, updated_at
         )
         SELECT $1, $2, $3, $4, $5, $6, $7, $8, $8
         WHERE EXISTS (
            SELECT 1 FROM jobs WHERE id = $7 AND status = $9 FOR SHARE
         )
         ON CONFLICT (submission_item_id) DO UPDATE
         SET is_correct = EXCLUDED.is_correct,
             critical_errors = EXCLUDED.critical_errors,
             part_errors = EXCLUDED.part_errors,
             partial_credit = EXCLUDED.partial_credit,
             clarify_notes = EXCLUDED.clarify_notes,
             job_id = EXCLUDED.job_id,
             graded_at = EXCLUDED.graded_at,
             updated_at = EXCLUDED.updated_at
         RETURNING {COLUMNS}"
    ))
    .bind(submission_item_id)
    .bind(verdict.is_correct)
    .bind(Json(&verdict.critical_errors))
    .bind(Json(&verdict.part_errors))
    .bind(verdict.partial_credit)
    .bind(clarify_notes)
    .bind(job_id)
    .bind(now)
    .bind(JobStatus::Running)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_item(
    pool: &PgPool,
    submission_item_id: i64,
) -> Result<Option<GradingRecord>, sqlx::Error> {
    sqlx::query_as::<_, GradingRecord>(&format!(
        "SELECT {COLUMNS} FROM gradings WHERE submission_item_id = $1"
    ))
    .bind(submission_item_id)
    .fetch_optional(pool)
    .await
}
