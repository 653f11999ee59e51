use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::core::config::Settings;
use crate::services::ai_grading::GradingExecutor;
use crate::services::upscale::Upscaler;
use crate::tasks::maintenance;
use crate::tasks::worker::Worker;
use crate::tasks::Pipeline;

/// Spawn `count` independent worker loops plus the stale sweeper when it is
/// enabled. Every task stops once `shutdown` flips to `true`.
pub(crate) fn spawn(
    settings: &Settings,
    pipeline: Pipeline,
    executor: Arc<dyn GradingExecutor>,
    upscaler: Arc<dyn Upscaler>,
    count: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let poll_interval = settings.worker().poll_interval();
    let mut handles = Vec::with_capacity(count + 1);

    for index in 0..count {
        let worker = Worker::new(
            worker_id(index),
            pipeline.clone(),
            executor.clone(),
            upscaler.clone(),
            poll_interval,
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    if let Some(timeout) = settings.worker().stale_timeout() {
        let sweep_every = Duration::from_secs(settings.worker().stale_sweep_interval_seconds);
        handles.push(tokio::spawn(stale_sweep_loop(pipeline, timeout, sweep_every, shutdown)));
    }

    handles
}

/// Run worker loops until Ctrl+C / SIGTERM, then wait for in-flight jobs.
pub(crate) async fn run(
    settings: &Settings,
    pipeline: Pipeline,
    executor: Arc<dyn GradingExecutor>,
    upscaler: Arc<dyn Upscaler>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = crate::core::shutdown::channel();
    let count = settings.worker().concurrency;

    tracing::info!(
        concurrency = count,
        poll_interval_ms = settings.worker().poll_interval_ms,
        stale_timeout_seconds = settings.worker().stale_timeout_seconds,
        "Starting worker loops"
    );

    let handles = spawn(settings, pipeline, executor, upscaler, count, shutdown_rx);

    crate::core::shutdown::shutdown_signal().await;
    stop(shutdown_tx, handles).await;
    Ok(())
}

/// Broadcast shutdown and join every background task.
pub(crate) async fn stop(shutdown_tx: watch::Sender<bool>, handles: Vec<JoinHandle<()>>) {
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }
}

fn worker_id(index: usize) -> String {
    format!("worker-{}-{index}", std::process::id())
}

async fn stale_sweep_loop(
    pipeline: Pipeline,
    timeout: Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(every);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = maintenance::fail_stale_jobs(&pipeline, timeout).await {
                    tracing::error!(error = %err, "fail_stale_jobs failed");
                }
            }
        }
    }
}
