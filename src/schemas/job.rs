use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{GradingRecord, Job};
use crate::db::types::{JobKind, JobStatus};
use crate::grading::GradingIssue;
use crate::jobs::JobFailure;

/// A job as served to pollers. Also what the watch client decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct JobResponse {
    pub(crate) id: i64,
    pub(crate) kind: JobKind,
    pub(crate) status: JobStatus,
    pub(crate) attempts: i32,
    pub(crate) payload: serde_json::Value,
    #[serde(default)]
    pub(crate) result: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) error: Option<JobFailure>,
    #[serde(default)]
    pub(crate) parent_job_id: Option<i64>,
    #[serde(default)]
    pub(crate) submission_id: Option<i64>,
    #[serde(default)]
    pub(crate) submission_item_id: Option<i64>,
    #[serde(default)]
    pub(crate) claimed_by: Option<String>,
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) started_at: Option<String>,
    #[serde(default)]
    pub(crate) finished_at: Option<String>,
    pub(crate) updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            attempts: job.attempts,
            payload: job.payload.0,
            result: job.result.map(|result| result.0),
            error: job.error.map(|error| error.0),
            parent_job_id: job.parent_job_id,
            submission_id: job.submission_id,
            submission_item_id: job.submission_item_id,
            claimed_by: job.claimed_by,
            created_at: format_primitive(job.created_at),
            started_at: job.started_at.map(format_primitive),
            finished_at: job.finished_at.map(format_primitive),
            updated_at: format_primitive(job.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EnqueueResponse {
    pub(crate) status: &'static str,
    pub(crate) job_id: i64,
}

impl EnqueueResponse {
    pub(crate) fn queued(job_id: i64) -> Self {
        Self { status: "queued", job_id }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionJobsResponse {
    pub(crate) submission_id: i64,
    pub(crate) counts: BTreeMap<&'static str, usize>,
    pub(crate) outstanding: bool,
    pub(crate) jobs: Vec<JobResponse>,
}

impl SubmissionJobsResponse {
    pub(crate) fn new(submission_id: i64, jobs: Vec<Job>) -> Self {
        let (counts, outstanding, jobs) = summarize(jobs);
        Self { submission_id, counts, outstanding, jobs }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ItemJobsResponse {
    pub(crate) submission_item_id: i64,
    pub(crate) counts: BTreeMap<&'static str, usize>,
    pub(crate) outstanding: bool,
    pub(crate) jobs: Vec<JobResponse>,
}

impl ItemJobsResponse {
    pub(crate) fn new(submission_item_id: i64, jobs: Vec<Job>) -> Self {
        let (counts, outstanding, jobs) = summarize(jobs);
        Self { submission_item_id, counts, outstanding, jobs }
    }
}

fn summarize(jobs: Vec<Job>) -> (BTreeMap<&'static str, usize>, bool, Vec<JobResponse>) {
    let mut counts = BTreeMap::new();
    for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Succeeded, JobStatus::Failed] {
        counts.insert(status.as_str(), 0);
    }
    for job in &jobs {
        *counts.entry(job.status.as_str()).or_insert(0) += 1;
    }
    let outstanding = jobs.iter().any(|job| !job.status.is_terminal());

    (counts, outstanding, jobs.into_iter().map(JobResponse::from).collect())
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingResponse {
    pub(crate) id: i64,
    pub(crate) submission_item_id: i64,
    pub(crate) is_correct: bool,
    pub(crate) critical_errors: Vec<GradingIssue>,
    pub(crate) part_errors: Vec<GradingIssue>,
    pub(crate) partial_credit: bool,
    pub(crate) clarify_notes: Option<String>,
    pub(crate) job_id: Option<i64>,
    pub(crate) graded_at: String,
    pub(crate) updated_at: String,
}

impl From<GradingRecord> for GradingResponse {
    fn from(record: GradingRecord) -> Self {
        Self {
            id: record.id,
            submission_item_id: record.submission_item_id,
            is_correct: record.is_correct,
            critical_errors: record.critical_errors.0,
            part_errors: record.part_errors.0,
            partial_credit: record.partial_credit,
            clarify_notes: record.clarify_notes,
            job_id: record.job_id,
            graded_at: format_primitive(record.graded_at),
            updated_at: format_primitive(record.updated_at),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RegradeRequest {
    #[validate(length(min = 1, max = 4000, message = "clarify must be 1-4000 characters"))]
    pub(crate) clarify: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct UpscaleRequest {
    #[validate(length(min = 1, message = "image_paths must not be empty"))]
    pub(crate) image_paths: Vec<String>,
}
