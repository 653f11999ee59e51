use std::sync::Arc;

use sqlx::PgPool;

use crate::api::ws::LiveHub;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::tasks::Pipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    pipeline: Pipeline,
    hub: LiveHub,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool, redis: RedisHandle, pipeline: Pipeline) -> Self {
        let hub = LiveHub::new();
        Self { inner: Arc::new(InnerState { settings, db, redis, pipeline, hub }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub(crate) fn hub(&self) -> &LiveHub {
        &self.inner.hub
    }
}
