use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::time::primitive_now_utc;
use crate::db::models::GradingRecord;
use crate::grading::{GradingItem, GradingStore, GradingVerdict, ItemCatalog};
use crate::jobs::StoreError;
use crate::repositories;

#[derive(Clone)]
pub(crate) struct PgGradingStore {
    pool: PgPool,
}

impl PgGradingStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradingStore for PgGradingStore {
    async fn upsert(
        &self,
        submission_item_id: i64,
        verdict: &GradingVerdict,
        clarify_notes: Option<&str>,
        job_id: i64,
    ) -> Result<Option<GradingRecord>, StoreError> {
        let record = repositories::gradings::upsert(
            &self.pool,
            submission_item_id,
            verdict,
            clarify_notes,
            job_id,
            primitive_now_utc(),
        )
        .await?;
        Ok(record)
    }

    async fn find_by_item(
        &self,
        submission_item_id: i64,
    ) -> Result<Option<GradingRecord>, StoreError> {
        Ok(repositories::gradings::find_by_item(&self.pool, submission_item_id).await?)
    }
}

#[derive(Clone)]
pub(crate) struct PgItemCatalog {
    pool: PgPool,
}

impl PgItemCatalog {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemCatalog for PgItemCatalog {
    async fn find_item(&self, submission_item_id: i64) -> Result<Option<GradingItem>, StoreError> {
        let row = repositories::items::find_grading_item(&self.pool, submission_item_id).await?;
        Ok(row.map(|row| GradingItem {
            id: row.id,
            submission_id: row.submission_id,
            question_image_paths: row.question_image_paths.0,
            answer_image_paths: row.answer_image_paths.0,
            solution_steps: row.solution_steps.map(|steps| steps.0),
        }))
    }

    async fn list_item_ids(&self, submission_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(repositories::items::list_ids_by_submission(&self.pool, submission_id).await?)
    }
}
