use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::db::models::Job;
use crate::db::types::JobStatus;
use crate::jobs::{JobFailure, JobStore, NewJob, StoreError};

/// Single-process job store with the same claim contract as the table:
/// candidate selection and the conditional `pending -> running` swap are
/// separate critical sections, so concurrent claimers can genuinely race.
#[derive(Default)]
pub(crate) struct MemoryJobStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    jobs: BTreeMap<i64, Stored>,
}

struct Stored {
    job: Job,
    dedup_key: Option<String>,
}

enum Claim {
    Claimed(Job),
    RaceLost,
}

impl MemoryJobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, job: NewJob, dedup_key: Option<String>) -> Result<i64, StoreError> {
        job.request.validate()?;
        let payload = job.request.payload()?;
        let now = primitive_now_utc();

        let mut state = self.lock();
        if let Some(key) = &dedup_key {
            let kind = job.request.kind();
            let active = state.jobs.values().find(|stored| {
                stored.job.kind == kind
                    && stored.dedup_key.as_deref() == Some(key.as_str())
                    && !stored.job.status.is_terminal()
            });
            if let Some(active) = active {
                return Ok(active.job.id);
            }
        }

        state.next_id += 1;
        let id = state.next_id;
        let row = Job {
            id,
            kind: job.request.kind(),
            status: JobStatus::Pending,
            payload: Json(payload),
            result: None,
            error: None,
            attempts: 0,
            parent_job_id: job.parent_job_id,
            submission_id: job.submission_id,
            submission_item_id: job.request.submission_item_id(),
            claimed_by: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        };
        state.jobs.insert(id, Stored { job: row, dedup_key });
        Ok(id)
    }

    fn oldest_pending(&self) -> Option<i64> {
        self.lock()
            .jobs
            .values()
            .filter(|stored| stored.job.status == JobStatus::Pending)
            .min_by_key(|stored| (stored.job.created_at, stored.job.id))
            .map(|stored| stored.job.id)
    }

    fn try_claim(&self, job_id: i64, worker_id: &str) -> Claim {
        let mut state = self.lock();
        let Some(stored) = state.jobs.get_mut(&job_id) else {
            return Claim::RaceLost;
        };
        if stored.job.status != JobStatus::Pending {
            return Claim::RaceLost;
        }

        let now = primitive_now_utc();
        stored.job.status = JobStatus::Running;
        stored.job.claimed_by = Some(worker_id.to_string());
        stored.job.started_at = Some(now);
        stored.job.updated_at = now;
        Claim::Claimed(stored.job.clone())
    }

    fn transition(
        &self,
        job_id: i64,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job, StoreError> {
        let mut state = self.lock();
        let stored = state.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        let from = stored.job.status;
        let allowed = match to {
            JobStatus::Running => from == JobStatus::Running,
            _ => from.can_transition_to(to),
        };
        if !allowed {
            return Err(StoreError::InvalidTransition { job_id, from, to });
        }

        stored.job.status = to;
        stored.job.updated_at = primitive_now_utc();
        apply(&mut stored.job);
        Ok(stored.job.clone())
    }

    /// Rewind a job's execution start; lets sweeper tests fake elapsed time.
    pub(crate) fn backdate_start(&self, job_id: i64, started_at: PrimitiveDateTime) {
        if let Some(stored) = self.lock().jobs.get_mut(&job_id) {
            stored.job.started_at = Some(started_at);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub(crate) fn status(&self, job_id: i64) -> Option<JobStatus> {
        self.lock().jobs.get(&job_id).map(|stored| stored.job.status)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<i64, StoreError> {
        self.insert(job, None)
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<i64, StoreError> {
        let key = job.request.dedup_key();
        self.insert(job, Some(key))
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let Some(candidate) = self.oldest_pending() else {
            return Ok(None);
        };

        tokio::task::yield_now().await;

        match self.try_claim(candidate, worker_id) {
            Claim::Claimed(job) => Ok(Some(job)),
            Claim::RaceLost => Ok(None),
        }
    }

    async fn mark_running(&self, job_id: i64) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Running, |job| {
            job.attempts += 1;
            job.started_at = Some(job.updated_at);
        })
    }

    async fn mark_succeeded(&self, job_id: i64, result: Value) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Succeeded, |job| {
            job.result = Some(Json(result));
            job.finished_at = Some(job.updated_at);
        })
    }

    async fn mark_failed(&self, job_id: i64, failure: JobFailure) -> Result<Job, StoreError> {
        self.transition(job_id, JobStatus::Failed, |job| {
            job.error = Some(Json(failure));
            job.finished_at = Some(job.updated_at);
        })
    }

    async fn find(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&job_id).map(|stored| stored.job.clone()))
    }

    async fn list_by_submission(&self, submission_id: i64) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|stored| stored.job.submission_id == Some(submission_id))
            .map(|stored| stored.job.clone())
            .collect())
    }

    async fn list_by_item(&self, submission_item_id: i64) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|stored| stored.job.submission_item_id == Some(submission_item_id))
            .map(|stored| stored.job.clone())
            .collect())
    }

    async fn list_stale_running(&self, cutoff: PrimitiveDateTime) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|stored| {
                stored.job.status == JobStatus::Running
                    && stored.job.started_at.is_some_and(|started| started <= cutoff)
            })
            .map(|stored| stored.job.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::MemoryJobStore;
    use crate::db::types::JobStatus;
    use crate::jobs::{FailureKind, JobFailure, JobRequest, JobStore, NewJob, StoreError};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claimers_get_the_job_exactly_once() {
        let store = Arc::new(MemoryJobStore::new());
        let job_id = store.enqueue(NewJob::new(JobRequest::grade_item(42))).await.expect("enqueue");

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next(&format!("worker-{worker}")).await.expect("claim")
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.expect("join") {
                winners.push(job);
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].id, job_id);
        assert_eq!(winners[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn claims_follow_creation_order() {
        let store = MemoryJobStore::new();
        let first = store.enqueue(NewJob::new(JobRequest::grade_item(1))).await.expect("enqueue");
        let second = store.enqueue(NewJob::new(JobRequest::grade_item(2))).await.expect("enqueue");

        let claimed = store.claim_next("w").await.expect("claim").expect("job");
        assert_eq!(claimed.id, first);
        let claimed = store.claim_next("w").await.expect("claim").expect("job");
        assert_eq!(claimed.id, second);
        assert!(store.claim_next("w").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_resurrected() {
        let store = MemoryJobStore::new();
        let job_id = store.enqueue(NewJob::new(JobRequest::grade_item(1))).await.expect("enqueue");
        store.claim_next("w").await.expect("claim");
        store.mark_running(job_id).await.expect("running");
        store.mark_succeeded(job_id, json!({"ok": true})).await.expect("succeeded");

        let failed = store.mark_failed(job_id, JobFailure::new(FailureKind::Stale, "late")).await;
        assert!(matches!(
            failed,
            Err(StoreError::InvalidTransition { from: JobStatus::Succeeded, to: JobStatus::Failed, .. })
        ));
        assert!(matches!(store.mark_running(job_id).await, Err(StoreError::InvalidTransition { .. })));
        assert!(store.claim_next("w").await.expect("claim").is_none());

        let job = store.find(job_id).await.expect("find").expect("job");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn enqueue_unique_reuses_active_job_only() {
        let store = MemoryJobStore::new();
        let first =
            store.enqueue_unique(NewJob::new(JobRequest::grade_item(42))).await.expect("enqueue");
        let again =
            store.enqueue_unique(NewJob::new(JobRequest::grade_item(42))).await.expect("enqueue");
        assert_eq!(first, again);

        store.claim_next("w").await.expect("claim");
        store.mark_running(first).await.expect("running");
        store.mark_failed(first, JobFailure::new(FailureKind::ExecutorTimeout, "slow")).await.expect("failed");

        let fresh =
            store.enqueue_unique(NewJob::new(JobRequest::grade_item(42))).await.expect("enqueue");
        assert_ne!(fresh, first);

        let plain = store.enqueue(NewJob::new(JobRequest::grade_item(42))).await.expect("enqueue");
        assert_ne!(plain, fresh);
    }

    #[tokio::test]
    async fn unknown_job_reports_not_found() {
        let store = MemoryJobStore::new();
        assert!(matches!(store.mark_running(99).await, Err(StoreError::NotFound(99))));
    }
}
