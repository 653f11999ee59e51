use thiserror::Error;

use crate::db::types::JobStatus;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition { job_id: i64, from: JobStatus, to: JobStatus },
    #[error("rejected job request: {0}")]
    Rejected(#[from] RequestError),
    #[error("job payload could not be encoded or decoded: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum RequestError {
    #[error("regrade requires a non-empty clarification")]
    MissingClarification,
    #[error("upscale requires at least one image path")]
    NoImages,
}
