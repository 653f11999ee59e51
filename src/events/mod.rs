//! Completion events and the publish/subscribe bus that carries them from
//! worker loops to the live-channel fan-out.
//!
//! Delivery is best-effort and at-most-once: the job row stays the source
//! of truth and an event only tells listeners to look at it sooner.

mod local;
mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::Job;
use crate::db::types::JobStatus;
use crate::jobs::JobFailure;

pub(crate) use self::local::LocalEventBus;
pub(crate) use self::redis::RedisEventBus;

const CHANNEL_PREFIX: &str = "gradeflow:events";

/// Wire format of one event: a single JSON text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CompletionEvent {
    pub(crate) event: String,
    pub(crate) job_id: i64,
    pub(crate) status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) submission_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) submission_item_id: Option<i64>,
}

impl CompletionEvent {
    pub(crate) fn from_job(job: &Job) -> Self {
        Self {
            event: job.kind.as_str().to_string(),
            job_id: job.id,
            status: job.status,
            result: job.result.as_ref().map(|result| result.0.clone()),
            error: job.failure().cloned(),
            submission_id: job.submission_id,
            submission_item_id: job.submission_item_id,
        }
    }

    pub(crate) fn topic(&self) -> Topic {
        match self.submission_id {
            Some(submission_id) => Topic::Submission(submission_id),
            None => Topic::Unrouted,
        }
    }
}

/// Routing key for events. Events are published on the topic of the
/// submission they affect; `All` observes every topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Topic {
    All,
    Submission(i64),
    Unrouted,
}

impl Topic {
    pub(crate) fn channel(&self) -> String {
        match self {
            Self::All => format!("{CHANNEL_PREFIX}:broadcast"),
            Self::Submission(id) => format!("{CHANNEL_PREFIX}:submission:{id}"),
            Self::Unrouted => format!("{CHANNEL_PREFIX}:unrouted"),
        }
    }

    /// Whether a subscriber on `self` sees an event published on `published`.
    pub(crate) fn accepts(&self, published: &Topic) -> bool {
        match (self, published) {
            (Self::All, _) | (_, Self::All) => true,
            (own, other) => own == other,
        }
    }
}

pub(crate) type EventStream = BoxStream<'static, CompletionEvent>;

#[derive(Debug, Error)]
pub(crate) enum BusError {
    #[error("event bus is not connected")]
    NotConnected,
    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[async_trait]
pub(crate) trait EventBus: Send + Sync {
    /// Fire and forget: with no subscriber listening the event is dropped.
    /// Returns how many subscribers the event reached.
    async fn publish(&self, topic: &Topic, event: &CompletionEvent) -> Result<usize, BusError>;

    /// A lazy stream of events accepted by `topic`, starting now. Events
    /// buffered for a dropped stream are lost.
    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError>;
}
