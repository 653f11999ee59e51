//! Grading verdicts and the two narrow views of the exam model the pipeline
//! touches: the items it grades and the one verdict row kept per item.

#[cfg(test)]
pub(crate) mod memory;
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::models::GradingRecord;
use crate::jobs::StoreError;

pub(crate) use postgres::{PgGradingStore, PgItemCatalog};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct GradingIssue {
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) phrases: Vec<String>,
}

/// What the executor decided about one answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct GradingVerdict {
    pub(crate) is_correct: bool,
    #[serde(default)]
    pub(crate) critical_errors: Vec<GradingIssue>,
    #[serde(default)]
    pub(crate) part_errors: Vec<GradingIssue>,
    #[serde(default)]
    pub(crate) partial_credit: bool,
}

impl From<&GradingRecord> for GradingVerdict {
    fn from(record: &GradingRecord) -> Self {
        Self {
            is_correct: record.is_correct,
            critical_errors: record.critical_errors.0.clone(),
            part_errors: record.part_errors.0.clone(),
            partial_credit: record.partial_credit,
        }
    }
}

/// One answer to grade, with the question it answers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradingItem {
    pub(crate) id: i64,
    pub(crate) submission_id: i64,
    pub(crate) question_image_paths: Vec<String>,
    pub(crate) answer_image_paths: Vec<String>,
    pub(crate) solution_steps: Option<serde_json::Value>,
}

#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    /// Create or replace the single verdict row for `submission_item_id`
    /// on behalf of `job_id`. Concurrent writers serialize on the row; the
    /// last write wins. Writes nothing and returns `None` once `job_id` is
    /// no longer running.
    async fn upsert(
        &self,
        submission_item_id: i64,
        verdict: &GradingVerdict,
        clarify_notes: Option<&str>,
        job_id: i64,
    ) -> Result<Option<GradingRecord>, StoreError>;

    async fn find_by_item(&self, submission_item_id: i64)
        -> Result<Option<GradingRecord>, StoreError>;
}

#[async_trait]
pub(crate) trait ItemCatalog: Send + Sync {
    async fn find_item(&self, submission_item_id: i64) -> Result<Option<GradingItem>, StoreError>;

    async fn list_item_ids(&self, submission_id: i64) -> Result<Vec<i64>, StoreError>;
}
