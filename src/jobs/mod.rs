//! Durable job records and the store contract worker loops rely on.
//!
//! Every status change goes through a conditional update guarded by the
//! current status, so a job only ever moves forward:
//! `pending -> running -> succeeded | failed`.

mod error;
mod failure;
#[cfg(test)]
pub(crate) mod memory;
mod postgres;
mod request;

use async_trait::async_trait;
use serde_json::Value;
use time::PrimitiveDateTime;

use crate::db::models::Job;

pub(crate) use error::{RequestError, StoreError};
pub(crate) use failure::{FailureKind, JobFailure};
pub(crate) use postgres::PgJobStore;
pub(crate) use request::{ItemPayload, JobRequest, NewJob, SubmissionPayload, UpscalePayload};

#[async_trait]
pub(crate) trait JobStore: Send + Sync {
    /// Insert a pending job. Never deduplicates.
    async fn enqueue(&self, job: NewJob) -> Result<i64, StoreError>;

    /// Insert a pending job unless one of the same kind and routing key is
    /// still pending or running, in which case that job's id is returned.
    async fn enqueue_unique(&self, job: NewJob) -> Result<i64, StoreError>;

    /// Atomically move the oldest pending job to `running` for `worker_id`.
    /// Losing a race to another worker yields `Ok(None)`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Record the start of execution on a claimed job and bump its attempt count.
    async fn mark_running(&self, job_id: i64) -> Result<Job, StoreError>;

    async fn mark_succeeded(&self, job_id: i64, result: Value) -> Result<Job, StoreError>;

    async fn mark_failed(&self, job_id: i64, failure: JobFailure) -> Result<Job, StoreError>;

    async fn find(&self, job_id: i64) -> Result<Option<Job>, StoreError>;

    async fn list_by_submission(&self, submission_id: i64) -> Result<Vec<Job>, StoreError>;

    async fn list_by_item(&self, submission_item_id: i64) -> Result<Vec<Job>, StoreError>;

    /// Running jobs whose execution started at or before `cutoff`.
    async fn list_stale_running(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Job>, StoreError>;
}

impl Job {
    pub(crate) fn request(&self) -> Result<JobRequest, serde_json::Error> {
        JobRequest::decode(self.kind, &self.payload.0)
    }

    pub(crate) fn failure(&self) -> Option<&JobFailure> {
        self.error.as_ref().map(|error| &error.0)
    }
}
