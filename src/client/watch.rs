use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::client::channel::LiveChannel;
use crate::client::poller::{CompletionWaiter, HttpStatusClient};
use crate::core::config::Settings;
use crate::db::types::JobStatus;

pub(crate) const EXIT_SUCCEEDED: i32 = 0;
pub(crate) const EXIT_FAILED: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchArgs {
    pub(crate) job_id: i64,
    pub(crate) server: Option<String>,
    pub(crate) poll_only: bool,
}

impl WatchArgs {
    /// `gradeflow-watch <job-id> [--server URL] [--poll-only]`
    pub(crate) fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut job_id = None;
        let mut server = None;
        let mut poll_only = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--server" => {
                    server = Some(args.next().ok_or_else(|| anyhow!("--server missing value"))?);
                }
                "--poll-only" => poll_only = true,
                other if other.starts_with("--") => return Err(anyhow!("unknown flag {other}")),
                other => {
                    if job_id.is_some() {
                        return Err(anyhow!("unexpected argument {other}"));
                    }
                    job_id = Some(other.parse::<i64>().with_context(|| format!("invalid job id {other}"))?);
                }
            }
        }

        let job_id = job_id.ok_or_else(|| anyhow!("usage: gradeflow-watch <job-id> [--server URL] [--poll-only]"))?;
        Ok(Self { job_id, server, poll_only })
    }
}

/// `http://host:8000` + `/api/v1` becomes `ws://host:8000/api/v1/ws`.
pub(crate) fn live_url_for(server_url: &str, api_prefix: &str) -> String {
    let server_url = server_url.trim_end_matches('/');
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        server_url.to_string()
    };
    format!("{base}{api_prefix}/ws")
}

pub(crate) fn exit_code(status: JobStatus) -> i32 {
    match status {
        JobStatus::Failed => EXIT_FAILED,
        _ => EXIT_SUCCEEDED,
    }
}

/// Wait for the job, print its final state as JSON and return the process
/// exit code.
pub(crate) async fn run(settings: &Settings, args: WatchArgs) -> Result<i32> {
    let live = settings.live();
    let api_prefix = &settings.api().api_v1_str;

    let (server_url, live_url) = match &args.server {
        Some(server) => (server.clone(), live_url_for(server, api_prefix)),
        None => (live.server_url.clone(), live.url.clone()),
    };

    let source = Arc::new(HttpStatusClient::new(&server_url, api_prefix)?);
    let channel = (!args.poll_only).then(|| LiveChannel::websocket(live_url.clone(), live));

    tracing::info!(
        job_id = args.job_id,
        server = %server_url,
        live_url = %live_url,
        poll_only = args.poll_only,
        "Watching job"
    );

    let waiter = CompletionWaiter::new(
        source,
        channel.clone(),
        Duration::from_secs(live.poll_interval_seconds),
    );
    let outcome = waiter.wait(args.job_id).await;

    if let Some(channel) = channel {
        channel.shutdown();
    }

    let job = outcome?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(exit_code(job.status))
}
