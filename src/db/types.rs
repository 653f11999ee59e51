use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "jobstatus", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Forward-only lifecycle: pending -> running -> succeeded | failed.
    #[cfg(test)]
    pub(crate) fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "jobkind", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum JobKind {
    GradeItem,
    RegradeItem,
    GradeSubmission,
    RegradeSubmission,
    UpscaleSubmission,
}

impl JobKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::GradeItem => "GRADE_ITEM",
            Self::RegradeItem => "REGRADE_ITEM",
            Self::GradeSubmission => "GRADE_SUBMISSION",
            Self::RegradeSubmission => "REGRADE_SUBMISSION",
            Self::UpscaleSubmission => "UPSCALE_SUBMISSION",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
