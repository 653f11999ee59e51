use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::types::Json;

use crate::core::time::primitive_now_utc;
use crate::db::models::GradingRecord;
use crate::db::types::JobStatus;
use crate::grading::{GradingItem, GradingStore, GradingVerdict, ItemCatalog};
use crate::jobs::memory::MemoryJobStore;
use crate::jobs::StoreError;

/// Verdict rows keyed by item. Checks job status against `jobs` the way
/// the table's upsert checks the `jobs` table.
pub(crate) struct MemoryGradingStore {
    rows: Mutex<HashMap<i64, GradingRecord>>,
    jobs: Arc<MemoryJobStore>,
}

impl MemoryGradingStore {
    pub(crate) fn new(jobs: Arc<MemoryJobStore>) -> Self {
        Self { rows: Mutex::new(HashMap::new()), jobs }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[async_trait]
impl GradingStore for MemoryGradingStore {
    async fn upsert(
        &self,
        submission_item_id: i64,
        verdict: &GradingVerdict,
        clarify_notes: Option<&str>,
        job_id: i64,
    ) -> Result<Option<GradingRecord>, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.jobs.status(job_id) != Some(JobStatus::Running) {
            return Ok(None);
        }
        let now = primitive_now_utc();
        let next_id = rows.len() as i64 + 1;

        let record = rows.entry(submission_item_id).or_insert_with(|| GradingRecord {
            id: next_id,
            submission_item_id,
            is_correct: false,
            critical_errors: Json(Vec::new()),
            part_errors: Json(Vec::new()),
            partial_credit: false,
            clarify_notes: None,
            job_id: None,
            graded_at: now,
            updated_at: now,
        });
        record.is_correct = verdict.is_correct;
        record.critical_errors = Json(verdict.critical_errors.clone());
        record.part_errors = Json(verdict.part_errors.clone());
        record.partial_credit = verdict.partial_credit;
        record.clarify_notes = clarify_notes.map(str::to_string);
        record.job_id = Some(job_id);
        record.graded_at = now;
        record.updated_at = now;

        Ok(Some(record.clone()))
    }

    async fn find_by_item(
        &self,
        submission_item_id: i64,
    ) -> Result<Option<GradingRecord>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(rows.get(&submission_item_id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct MemoryItemCatalog {
    items: Mutex<HashMap<i64, GradingItem>>,
}

impl MemoryItemCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an item with one question image and one answer image.
    pub(crate) fn add_item(&self, id: i64, submission_id: i64) -> GradingItem {
        let item = GradingItem {
            id,
            submission_id,
            question_image_paths: vec![format!("questions/{id}.png")],
            answer_image_paths: vec![format!("answers/{id}.png")],
            solution_steps: None,
        };
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, item.clone());
        item
    }
}

#[async_trait]
impl ItemCatalog for MemoryItemCatalog {
    async fn find_item(&self, submission_item_id: i64) -> Result<Option<GradingItem>, StoreError> {
        let items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(items.get(&submission_item_id).cloned())
    }

    async fn list_item_ids(&self, submission_id: i64) -> Result<Vec<i64>, StoreError> {
        let items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids = items
            .values()
            .filter(|item| item.submission_id == submission_id)
            .map(|item| item.id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids)
    }
}
