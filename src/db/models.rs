use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{JobKind, JobStatus};
use crate::grading::GradingIssue;
use crate::jobs::JobFailure;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Job {
    pub(crate) id: i64,
    pub(crate) kind: JobKind,
    pub(crate) status: JobStatus,
    pub(crate) payload: Json<serde_json::Value>,
    pub(crate) result: Option<Json<serde_json::Value>>,
    pub(crate) error: Option<Json<JobFailure>>,
    pub(crate) attempts: i32,
    pub(crate) parent_job_id: Option<i64>,
    pub(crate) submission_id: Option<i64>,
    pub(crate) submission_item_id: Option<i64>,
    pub(crate) claimed_by: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) finished_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingRecord {
    pub(crate) id: i64,
    pub(crate) submission_item_id: i64,
    pub(crate) is_correct: bool,
    pub(crate) critical_errors: Json<Vec<GradingIssue>>,
    pub(crate) part_errors: Json<Vec<GradingIssue>>,
    pub(crate) partial_credit: bool,
    pub(crate) clarify_notes: Option<String>,
    pub(crate) job_id: Option<i64>,
    pub(crate) graded_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// One submission item joined with its question, as the executor needs it.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct GradingItemRow {
    pub(crate) id: i64,
    pub(crate) submission_id: i64,
    pub(crate) question_image_paths: Json<Vec<String>>,
    pub(crate) answer_image_paths: Json<Vec<String>>,
    pub(crate) solution_steps: Option<Json<serde_json::Value>>,
}
