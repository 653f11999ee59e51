use sqlx::PgPool;

use crate::db::models::GradingItemRow;

pub(crate) async fn find_grading_item(
    pool: &PgPool,
    submission_item_id: i64,
) -> Result<Option<GradingItemRow>, sqlx::Error> {
    sqlx::query_as::<_, GradingItemRow>(
        "SELECT si.id, si.submission_id, q.question_image_paths, si.answer_image_paths,
                q.solution_steps
         FROM submission_items si
         JOIN questions q ON q.id = si.question_id
         WHERE si.id = $1",
    )
    .bind(submission_item_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_ids_by_submission(
    pool: &PgPool,
    submission_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM submission_items WHERE submission_id = $1 ORDER BY id",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await
}
