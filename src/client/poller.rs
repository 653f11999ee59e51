use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::client::channel::LiveChannel;
use crate::schemas::job::JobResponse;

#[derive(Debug, Error)]
pub(crate) enum PollError {
    #[error("job {0} does not exist")]
    NotFound(i64),
    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where the authoritative job state is read from.
#[async_trait]
pub(crate) trait JobStatusSource: Send + Sync {
    async fn fetch_job(&self, job_id: i64) -> Result<JobResponse, PollError>;
}

/// Reads `GET {server}{api_prefix}/jobs/{id}`.
#[derive(Debug, Clone)]
pub(crate) struct HttpStatusClient {
    http: reqwest::Client,
    jobs_url: String,
}

impl HttpStatusClient {
    pub(crate) fn new(server_url: &str, api_prefix: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        let jobs_url = format!("{}{}/jobs", server_url.trim_end_matches('/'), api_prefix);
        Ok(Self { http, jobs_url })
    }
}

#[async_trait]
impl JobStatusSource for HttpStatusClient {
    async fn fetch_job(&self, job_id: i64) -> Result<JobResponse, PollError> {
        let response = self.http.get(format!("{}/{job_id}", self.jobs_url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PollError::NotFound(job_id));
        }
        Ok(response.error_for_status()?.json::<JobResponse>().await?)
    }
}

/// Waits for a job to finish: polls on a fixed interval and, when a live
/// channel is available, re-polls as soon as an event for the job arrives.
/// The polled state decides; the event is only a hint.
pub(crate) struct CompletionWaiter {
    source: Arc<dyn JobStatusSource>,
    channel: Option<LiveChannel>,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub(crate) fn new(
        source: Arc<dyn JobStatusSource>,
        channel: Option<LiveChannel>,
        poll_interval: Duration,
    ) -> Self {
        Self { source, channel, poll_interval }
    }

    /// Returns the job as polled once it is `succeeded` or `failed`.
    pub(crate) async fn wait(&self, job_id: i64) -> Result<JobResponse, PollError> {
        let hint = async {
            match &self.channel {
                Some(channel) => channel.wait_for_job(job_id).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(hint);
        let mut hint_pending = true;
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = &mut hint, if hint_pending => {
                    hint_pending = false;
                    if let Some(event) = event {
                        tracing::debug!(job_id, status = %event.status, "Completion event received; polling now");
                    }
                }
            }

            match self.source.fetch_job(job_id).await {
                Ok(job) if job.status.is_terminal() => return Ok(job),
                Ok(job) => {
                    tracing::debug!(job_id, status = %job.status, "Job still outstanding");
                }
                Err(PollError::NotFound(job_id)) => return Err(PollError::NotFound(job_id)),
                Err(err) => {
                    tracing::warn!(job_id, error = %err, "Job status poll failed; retrying");
                }
            }
        }
    }
}
