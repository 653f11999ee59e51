use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified cause recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FailureKind {
    ExecutorAuth,
    ExecutorRateLimit,
    ExecutorMalformedResponse,
    ExecutorTimeout,
    ExecutorTransport,
    InvalidInput,
    Persistence,
    UpscaleFailed,
    Stale,
}

impl FailureKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ExecutorAuth => "executor_auth",
            Self::ExecutorRateLimit => "executor_rate_limit",
            Self::ExecutorMalformedResponse => "executor_malformed_response",
            Self::ExecutorTimeout => "executor_timeout",
            Self::ExecutorTransport => "executor_transport",
            Self::InvalidInput => "invalid_input",
            Self::Persistence => "persistence",
            Self::UpscaleFailed => "upscale_failed",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JobFailure {
    pub(crate) kind: FailureKind,
    pub(crate) message: String,
}

impl JobFailure {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}
