use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("jobs_enqueued_total", "Jobs inserted into the job store");
    metrics::describe_counter!("jobs_claimed_total", "Jobs claimed by a worker loop");
    metrics::describe_counter!(
        "jobs_completed_total",
        "Jobs that reached a terminal status, by kind and status"
    );
    metrics::describe_histogram!("job_duration_seconds", "Execution time of claimed jobs");
    metrics::describe_histogram!(
        "job_queue_latency_seconds",
        "Time between enqueue and claim"
    );
    metrics::describe_counter!("events_published_total", "Completion events handed to the bus");
    metrics::describe_counter!(
        "stale_jobs_failed_total",
        "Running jobs failed by the staleness sweeper"
    );
    metrics::describe_gauge!("live_connections", "Open live-channel WebSocket connections");
}
