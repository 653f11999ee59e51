pub(crate) mod api;
pub(crate) mod client;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod events;
pub(crate) mod grading;
pub(crate) mod jobs;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::config::{EventBackend, Settings};
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::events::{EventBus, LocalEventBus, RedisEventBus};
use crate::services::ai_grading::{GradingExecutor, OpenAiGradingService};
use crate::services::upscale::{RealEsrganUpscaler, Upscaler};
use crate::tasks::{scheduler, worker::Worker, Pipeline};

/// Database, Redis and event bus shared by the API and worker processes.
struct Backends {
    pipeline: Pipeline,
    db: sqlx::PgPool,
    redis: RedisHandle,
}

async fn connect_backends(settings: &Settings) -> anyhow::Result<Backends> {
    let db = db::init_pool(settings).await?;
    db::run_migrations(&db).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; publishing will retry");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let bus: Arc<dyn EventBus> = match settings.events().backend {
        EventBackend::Redis => Arc::new(RedisEventBus::new(redis.clone())),
        EventBackend::Local => Arc::new(LocalEventBus::default()),
    };

    let pipeline = Pipeline::postgres(db.clone(), bus);
    Ok(Backends { pipeline, db, redis })
}

fn executors(settings: &Settings) -> anyhow::Result<(Arc<dyn GradingExecutor>, Arc<dyn Upscaler>)> {
    settings.require_executor_credentials()?;
    let executor: Arc<dyn GradingExecutor> = Arc::new(OpenAiGradingService::from_settings(settings)?);
    let upscaler: Arc<dyn Upscaler> = Arc::new(RealEsrganUpscaler::from_settings(settings));
    Ok((executor, upscaler))
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "gradeflow-api")?;
    core::metrics::init(&settings)?;

    let Backends { pipeline, db, redis } = connect_backends(&settings).await?;
    let state = AppState::new(settings, db, redis.clone(), pipeline.clone());

    let (shutdown_tx, shutdown_rx) = core::shutdown::channel();
    let mut background = vec![
        api::ws::spawn_bridge(pipeline.bus.clone(), state.hub().clone(), shutdown_rx.clone()),
        api::ws::start_heartbeat(state.hub().clone(), shutdown_rx.clone()),
    ];

    let embedded = state.settings().worker().embedded;
    if embedded > 0 {
        let (executor, upscaler) = executors(state.settings())?;
        tracing::info!(count = embedded, "Starting embedded worker loops");
        background.extend(scheduler::spawn(
            state.settings(),
            pipeline,
            executor,
            upscaler,
            embedded,
            shutdown_rx,
        ));
    }

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Gradeflow API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    scheduler::stop(shutdown_tx, background).await;
    state.hub().close_all().await;
    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

/// Run worker loops until shutdown. With `once`, process pending jobs
/// with a single loop and exit when none are left.
pub async fn run_worker(once: bool) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "gradeflow-worker")?;
    core::metrics::init(&settings)?;

    let (executor, upscaler) = executors(&settings)?;
    let Backends { pipeline, redis, .. } = connect_backends(&settings).await?;

    let result = if once {
        drain(&settings, pipeline, executor, upscaler).await
    } else {
        scheduler::run(&settings, pipeline, executor, upscaler).await
    };

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result
}

async fn drain(
    settings: &Settings,
    pipeline: Pipeline,
    executor: Arc<dyn GradingExecutor>,
    upscaler: Arc<dyn Upscaler>,
) -> anyhow::Result<()> {
    let worker = Worker::new(
        format!("worker-{}-once", std::process::id()),
        pipeline,
        executor,
        upscaler,
        settings.worker().poll_interval(),
    );

    let mut processed = 0usize;
    while worker.run_once().await?.is_some() {
        processed += 1;
    }

    tracing::info!(worker_id = %worker.id(), processed, "No pending jobs left; exiting");
    Ok(())
}

/// Entry point of `gradeflow-watch`. Returns the process exit code.
pub async fn run_watch(args: Vec<String>) -> anyhow::Result<i32> {
    dotenvy::dotenv().ok();

    let args = client::watch::WatchArgs::parse(args)?;
    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, "gradeflow-watch")?;

    client::watch::run(&settings, args).await
}
