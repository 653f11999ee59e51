use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::types::JobKind;
use crate::jobs::error::RequestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ItemPayload {
    pub(crate) submission_item_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) clarification_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SubmissionPayload {
    pub(crate) submission_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) clarification_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UpscalePayload {
    pub(crate) submission_id: i64,
    pub(crate) image_paths: Vec<String>,
}

/// A job kind together with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobRequest {
    GradeItem(ItemPayload),
    RegradeItem(ItemPayload),
    GradeSubmission(SubmissionPayload),
    RegradeSubmission(SubmissionPayload),
    UpscaleSubmission(UpscalePayload),
}

impl JobRequest {
    pub(crate) fn grade_item(submission_item_id: i64) -> Self {
        Self::GradeItem(ItemPayload { submission_item_id, clarification_text: None })
    }

    pub(crate) fn regrade_item(submission_item_id: i64, clarification: impl Into<String>) -> Self {
        Self::RegradeItem(ItemPayload {
            submission_item_id,
            clarification_text: Some(clarification.into()),
        })
    }

    pub(crate) fn kind(&self) -> JobKind {
        match self {
            Self::GradeItem(_) => JobKind::GradeItem,
            Self::RegradeItem(_) => JobKind::RegradeItem,
            Self::GradeSubmission(_) => JobKind::GradeSubmission,
            Self::RegradeSubmission(_) => JobKind::RegradeSubmission,
            Self::UpscaleSubmission(_) => JobKind::UpscaleSubmission,
        }
    }

    pub(crate) fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::GradeItem(payload) | Self::RegradeItem(payload) => serde_json::to_value(payload),
            Self::GradeSubmission(payload) | Self::RegradeSubmission(payload) => {
                serde_json::to_value(payload)
            }
            Self::UpscaleSubmission(payload) => serde_json::to_value(payload),
        }
    }

    pub(crate) fn decode(kind: JobKind, payload: &Value) -> Result<Self, serde_json::Error> {
        let request = match kind {
            JobKind::GradeItem => Self::GradeItem(ItemPayload::deserialize(payload)?),
            JobKind::RegradeItem => Self::RegradeItem(ItemPayload::deserialize(payload)?),
            JobKind::GradeSubmission => {
                Self::GradeSubmission(SubmissionPayload::deserialize(payload)?)
            }
            JobKind::RegradeSubmission => {
                Self::RegradeSubmission(SubmissionPayload::deserialize(payload)?)
            }
            JobKind::UpscaleSubmission => {
                Self::UpscaleSubmission(UpscalePayload::deserialize(payload)?)
            }
        };
        Ok(request)
    }

    pub(crate) fn validate(&self) -> Result<(), RequestError> {
        match self {
            Self::RegradeItem(ItemPayload { clarification_text, .. })
            | Self::RegradeSubmission(SubmissionPayload { clarification_text, .. }) => {
                match clarification_text.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => Ok(()),
                    _ => Err(RequestError::MissingClarification),
                }
            }
            Self::UpscaleSubmission(payload) if payload.image_paths.is_empty() => {
                Err(RequestError::NoImages)
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn submission_item_id(&self) -> Option<i64> {
        match self {
            Self::GradeItem(payload) | Self::RegradeItem(payload) => {
                Some(payload.submission_item_id)
            }
            _ => None,
        }
    }

    pub(crate) fn submission_id(&self) -> Option<i64> {
        match self {
            Self::GradeSubmission(payload) | Self::RegradeSubmission(payload) => {
                Some(payload.submission_id)
            }
            Self::UpscaleSubmission(payload) => Some(payload.submission_id),
            _ => None,
        }
    }

    /// Routing key used by deduplicating enqueue; unique per kind.
    pub(crate) fn dedup_key(&self) -> String {
        match self.submission_item_id() {
            Some(item_id) => format!("item:{item_id}"),
            None => format!("submission:{}", self.submission_id().unwrap_or_default()),
        }
    }
}

/// Everything needed to insert a job row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewJob {
    pub(crate) request: JobRequest,
    pub(crate) parent_job_id: Option<i64>,
    pub(crate) submission_id: Option<i64>,
}

impl NewJob {
    pub(crate) fn new(request: JobRequest) -> Self {
        let submission_id = request.submission_id();
        Self { request, parent_job_id: None, submission_id }
    }

    pub(crate) fn with_parent(mut self, parent_job_id: i64) -> Self {
        self.parent_job_id = Some(parent_job_id);
        self
    }

    /// Item jobs do not carry their submission in the payload; the caller
    /// supplies it so submission-level topics and queries can see them.
    pub(crate) fn in_submission(mut self, submission_id: i64) -> Self {
        self.submission_id = Some(submission_id);
        self
    }
}
