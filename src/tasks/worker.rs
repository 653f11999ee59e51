use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::core::shutdown::sleep_or_shutdown;
use crate::core::time::elapsed_seconds;
use crate::db::models::Job;
use crate::jobs::{FailureKind, JobFailure, StoreError};
use crate::services::ai_grading::GradingExecutor;
use crate::services::upscale::Upscaler;
use crate::tasks::Pipeline;

/// One worker loop: claims a job, runs it to completion, then claims the
/// next. Never holds more than one job at a time.
pub(crate) struct Worker {
    pub(super) id: String,
    pub(super) pipeline: Pipeline,
    pub(super) executor: Arc<dyn GradingExecutor>,
    pub(super) upscaler: Arc<dyn Upscaler>,
    poll_interval: Duration,
}

impl Worker {
    pub(crate) fn new(
        id: impl Into<String>,
        pipeline: Pipeline,
        executor: Arc<dyn GradingExecutor>,
        upscaler: Arc<dyn Upscaler>,
        poll_interval: Duration,
    ) -> Self {
        Self { id: id.into(), pipeline, executor, upscaler, poll_interval }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Loop until shutdown. A job in flight is always finished first.
    pub(crate) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.id, "Worker loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(worker_id = %self.id, error = %err, "Failed to claim job");
                }
            }

            if !sleep_or_shutdown(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        tracing::info!(worker_id = %self.id, "Worker loop stopped");
    }

    /// Claim and process at most one job. Returns the job as last stored.
    pub(crate) async fn run_once(&self) -> Result<Option<Job>, StoreError> {
        let Some(job) = self.pipeline.jobs.claim_next(&self.id).await? else {
            return Ok(None);
        };

        metrics::counter!("jobs_claimed_total").increment(1);
        if let Some(started_at) = job.started_at {
            metrics::histogram!("job_queue_latency_seconds")
                .record(elapsed_seconds(job.created_at, started_at));
        }
        tracing::info!(worker_id = %self.id, job_id = job.id, kind = %job.kind, "Job claimed");

        Ok(Some(self.process(job).await))
    }

    async fn process(&self, claimed: Job) -> Job {
        let job_id = claimed.id;
        let kind = claimed.kind;

        let running = match self.pipeline.jobs.mark_running(job_id).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    worker_id = %self.id,
                    job_id,
                    status = %from,
                    "Claimed job is no longer running; skipping"
                );
                return claimed;
            }
            Err(err) => {
                tracing::error!(worker_id = %self.id, job_id, error = %err, "Failed to mark job running");
                let failure = JobFailure::new(FailureKind::Persistence, err.to_string());
                return self.finish(claimed, Err(failure)).await;
            }
        };

        let timer = Instant::now();
        let outcome = self.dispatch(&running).await;
        metrics::histogram!("job_duration_seconds", "kind" => kind.as_str())
            .record(timer.elapsed().as_secs_f64());

        self.finish(running, outcome).await
    }

    /// Persist the terminal status and publish exactly one event for it.
    async fn finish(&self, job: Job, outcome: Result<serde_json::Value, JobFailure>) -> Job {
        let job_id = job.id;
        let stored = match outcome {
            Ok(result) => self.pipeline.jobs.mark_succeeded(job_id, result).await,
            Err(failure) => {
                tracing::warn!(
                    worker_id = %self.id,
                    job_id,
                    kind = %job.kind,
                    failure_kind = %failure.kind,
                    message = %failure.message,
                    "Job failed"
                );
                self.pipeline.jobs.mark_failed(job_id, failure).await
            }
        };

        let finished = match stored {
            Ok(finished) => finished,
            Err(StoreError::InvalidTransition { from, .. }) => {
                // Someone else (the stale sweeper) already finished it and
                // published the event.
                tracing::warn!(
                    worker_id = %self.id,
                    job_id,
                    status = %from,
                    "Job was finished elsewhere; outcome discarded"
                );
                return job;
            }
            Err(err) => {
                tracing::error!(worker_id = %self.id, job_id, error = %err, "Failed to store job outcome");
                let failure = JobFailure::new(FailureKind::Persistence, err.to_string());
                match self.pipeline.jobs.mark_failed(job_id, failure).await {
                    Ok(failed) => failed,
                    Err(err) => {
                        tracing::error!(
                            worker_id = %self.id,
                            job_id,
                            error = %err,
                            "Failed to record persistence failure; job left running"
                        );
                        return job;
                    }
                }
            }
        };

        metrics::counter!(
            "jobs_completed_total",
            "kind" => finished.kind.as_str(),
            "status" => finished.status.as_str()
        )
        .increment(1);
        tracing::info!(
            worker_id = %self.id,
            job_id,
            kind = %finished.kind,
            status = %finished.status,
            "Job finished"
        );

        self.pipeline.publish_completion(&finished).await;
        finished
    }
}
