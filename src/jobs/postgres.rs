use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::Job;
use crate::db::types::JobStatus;
use crate::jobs::{JobFailure, JobStore, NewJob, StoreError};
use crate::repositories;

const DEDUP_ATTEMPTS: usize = 3;

/// Job store backed by the `jobs` table.
#[derive(Clone)]
pub(crate) struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, job: &NewJob, dedup_key: Option<&str>) -> Result<Option<Job>, StoreError> {
        job.request.validate()?;
        let payload = job.request.payload()?;

        let inserted = repositories::jobs::insert(
            &self.pool,
            repositories::jobs::InsertJob {
                kind: job.request.kind(),
                payload,
                parent_job_id: job.parent_job_id,
                submission_id: job.submission_id,
                submission_item_id: job.request.submission_item_id(),
                dedup_key,
                now: primitive_now_utc(),
            },
        )
        .await?;

        if let Some(row) = &inserted {
            metrics::counter!("jobs_enqueued_total", "kind" => row.kind.as_str()).increment(1);
            tracing::info!(job_id = row.id, kind = %row.kind, "Job enqueued");
        }

        Ok(inserted)
    }

    /// A guarded update matched nothing: tell a missing job apart from one
    /// that is in the wrong status.
    async fn transition_error(&self, job_id: i64, to: JobStatus) -> StoreError {
        match repositories::jobs::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => StoreError::InvalidTransition { job_id, from: job.status, to },
            Ok(None) => StoreError::NotFound(job_id),
            Err(err) => StoreError::Database(err),
        }
    }

    async fn finish(
        &self,
        job_id: i64,
        status: JobStatus,
        result: Option<Value>,
        failure: Option<JobFailure>,
    ) -> Result<Job, StoreError> {
        let finished = repositories::jobs::finish(
            &self.pool,
            job_id,
            status,
            result,
            failure,
            primitive_now_utc(),
        )
        .await?;

        match finished {
            Some(job) => Ok(job),
            None => Err(self.transition_error(job_id, status).await),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<i64, StoreError> {
        match self.insert(&job, None).await? {
            Some(row) => Ok(row.id),
            // Rows without a dedup key cannot conflict.
            None => Err(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<i64, StoreError> {
        let kind = job.request.kind();
        let dedup_key = job.request.dedup_key();

        for _ in 0..DEDUP_ATTEMPTS {
            if let Some(existing) =
                repositories::jobs::find_active_by_dedup_key(&self.pool, kind, &dedup_key).await?
            {
                tracing::debug!(job_id = existing, kind = %kind, dedup_key = %dedup_key, "Active job reused");
                return Ok(existing);
            }

            if let Some(row) = self.insert(&job, Some(&dedup_key)).await? {
                return Ok(row.id);
            }
            // Lost the insert to a concurrent request; its job may already
            // have finished, so look again.
        }

        Err(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let claimed =
            repositories::jobs::claim_next(&self.pool, worker_id, primitive_now_utc()).await?;
        Ok(claimed)
    }

    async fn mark_running(&self, job_id: i64) -> Result<Job, StoreError> {
        match repositories::jobs::mark_running(&self.pool, job_id, primitive_now_utc()).await? {
            Some(job) => Ok(job),
            None => Err(self.transition_error(job_id, JobStatus::Running).await),
        }
    }

    async fn mark_succeeded(&self, job_id: i64, result: Value) -> Result<Job, StoreError> {
        self.finish(job_id, JobStatus::Succeeded, Some(result), None).await
    }

    async fn mark_failed(&self, job_id: i64, failure: JobFailure) -> Result<Job, StoreError> {
        self.finish(job_id, JobStatus::Failed, None, Some(failure)).await
    }

    async fn find(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        Ok(repositories::jobs::find_by_id(&self.pool, job_id).await?)
    }

    async fn list_by_submission(&self, submission_id: i64) -> Result<Vec<Job>, StoreError> {
        Ok(repositories::jobs::list_by_submission(&self.pool, submission_id).await?)
    }

    async fn list_by_item(&self, submission_item_id: i64) -> Result<Vec<Job>, StoreError> {
        Ok(repositories::jobs::list_by_item(&self.pool, submission_item_id).await?)
    }

    async fn list_stale_running(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Job>, StoreError> {
        Ok(repositories::jobs::list_stale_running(&self.pool, cutoff).await?)
    }
}
