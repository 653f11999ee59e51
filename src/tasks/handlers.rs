use serde_json::{json, Value};

use crate::db::models::Job;
use crate::grading::GradingVerdict;
use crate::jobs::{
    FailureKind, ItemPayload, JobFailure, JobRequest, NewJob, StoreError, SubmissionPayload,
    UpscalePayload,
};
use crate::services::ai_grading::{ExecutorError, ExecutorErrorKind, GradeRequest};
use crate::services::upscale::UpscaleError;
use crate::tasks::worker::Worker;

impl From<ExecutorError> for JobFailure {
    fn from(err: ExecutorError) -> Self {
        let kind = match err.kind {
            ExecutorErrorKind::Auth => FailureKind::ExecutorAuth,
            ExecutorErrorKind::RateLimit => FailureKind::ExecutorRateLimit,
            ExecutorErrorKind::MalformedResponse => FailureKind::ExecutorMalformedResponse,
            ExecutorErrorKind::Timeout => FailureKind::ExecutorTimeout,
            ExecutorErrorKind::Transport => FailureKind::ExecutorTransport,
            ExecutorErrorKind::InvalidInput => FailureKind::InvalidInput,
        };
        JobFailure::new(kind, err.message)
    }
}

impl From<UpscaleError> for JobFailure {
    fn from(err: UpscaleError) -> Self {
        let kind = match err {
            UpscaleError::NotConfigured | UpscaleError::MissingInput(_) => FailureKind::InvalidInput,
            UpscaleError::Io(_) | UpscaleError::Failed { .. } | UpscaleError::TimedOut { .. } => {
                FailureKind::UpscaleFailed
            }
        };
        JobFailure::new(kind, err.to_string())
    }
}

fn persistence(err: StoreError) -> JobFailure {
    JobFailure::new(FailureKind::Persistence, err.to_string())
}

impl Worker {
    /// Run the handler for the job's kind. `Ok` carries the job's result.
    pub(super) async fn dispatch(&self, job: &Job) -> Result<Value, JobFailure> {
        let request = job.request().map_err(|err| {
            JobFailure::new(FailureKind::InvalidInput, format!("payload does not match {}: {err}", job.kind))
        })?;

        match request {
            JobRequest::GradeItem(payload) | JobRequest::RegradeItem(payload) => {
                self.grade_item(job, payload).await
            }
            JobRequest::GradeSubmission(payload) => self.fan_out(job, payload, false).await,
            JobRequest::RegradeSubmission(payload) => self.fan_out(job, payload, true).await,
            JobRequest::UpscaleSubmission(payload) => self.upscale(payload).await,
        }
    }

    async fn grade_item(&self, job: &Job, payload: ItemPayload) -> Result<Value, JobFailure> {
        let item = self
            .pipeline
            .catalog
            .find_item(payload.submission_item_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                JobFailure::new(
                    FailureKind::InvalidInput,
                    format!("submission item {} does not exist", payload.submission_item_id),
                )
            })?;

        let previous = self
            .pipeline
            .gradings
            .find_by_item(item.id)
            .await
            .map_err(persistence)?
            .map(|record| GradingVerdict::from(&record));

        let request = GradeRequest {
            submission_item_id: item.id,
            question_image_paths: item.question_image_paths,
            answer_image_paths: item.answer_image_paths,
            clarification: payload.clarification_text.clone(),
            previous,
            solution_steps: item.solution_steps,
        };
        let verdict = self.executor.grade(&request).await?;

        let Some(record) = self
            .pipeline
            .gradings
            .upsert(item.id, &verdict, payload.clarification_text.as_deref(), job.id)
            .await
            .map_err(persistence)?
        else {
            return Err(JobFailure::new(
                FailureKind::Stale,
                "job was finished elsewhere before its grading was stored",
            ));
        };

        Ok(json!({
            "grading_id": record.id,
            "submission_item_id": item.id,
            "is_correct": verdict.is_correct,
            "critical_errors": verdict.critical_errors.len(),
            "part_errors": verdict.part_errors.len(),
            "partial_credit": verdict.partial_credit,
        }))
    }

    /// Queue one item job per item of the submission. Grading reuses active
    /// item jobs; every regrade child is fresh so its clarification runs.
    async fn fan_out(
        &self,
        job: &Job,
        payload: SubmissionPayload,
        regrade: bool,
    ) -> Result<Value, JobFailure> {
        let item_ids =
            self.pipeline.catalog.list_item_ids(payload.submission_id).await.map_err(persistence)?;

        let mut queued = Vec::with_capacity(item_ids.len());
        for submission_item_id in item_ids {
            let item = ItemPayload {
                submission_item_id,
                clarification_text: payload.clarification_text.clone(),
            };
            let request =
                if regrade { JobRequest::RegradeItem(item) } else { JobRequest::GradeItem(item) };
            let child = NewJob::new(request).in_submission(payload.submission_id).with_parent(job.id);

            let enqueued = if regrade {
                self.pipeline.jobs.enqueue(child).await
            } else {
                self.pipeline.jobs.enqueue_unique(child).await
            };
            let child_id = enqueued.map_err(|err| match err {
                StoreError::Rejected(rejected) => {
                    JobFailure::new(FailureKind::InvalidInput, rejected.to_string())
                }
                other => persistence(other),
            })?;
            queued.push(child_id);
        }

        tracing::info!(
            job_id = job.id,
            submission_id = payload.submission_id,
            queued = queued.len(),
            "Submission fanned out"
        );
        Ok(json!({ "queued_jobs": queued }))
    }

    async fn upscale(&self, payload: UpscalePayload) -> Result<Value, JobFailure> {
        let paths = self.upscaler.upscale(payload.submission_id, &payload.image_paths).await?;
        Ok(json!({ "upscaled_paths": paths }))
    }
}
