use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared Redis connection. Once established, the connection manager heals
/// itself; until then `publish` retries the connect at most once per
/// `RECONNECT_INTERVAL`.
#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
    reconnect: Arc<Mutex<ReconnectGate>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

#[derive(Debug)]
struct ReconnectGate {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectGate {
    fn new(interval: Duration) -> Self {
        Self { interval, last_attempt: None }
    }

    /// Record an attempt at `now` unless the previous one is too recent.
    fn try_begin(&mut self, now: Instant) -> bool {
        if self.last_attempt.is_some_and(|last| now.saturating_duration_since(last) < self.interval) {
            return false;
        }
        self.last_attempt = Some(now);
        true
    }
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self {
            url,
            manager: Arc::new(RwLock::new(None)),
            reconnect: Arc::new(Mutex::new(ReconnectGate::new(RECONNECT_INTERVAL))),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let mut gate = self.reconnect.lock().await;
        gate.try_begin(Instant::now());
        self.open().await
    }

    async fn open(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    /// The live connection, or a fresh one when the last attempt is old
    /// enough to retry.
    async fn current_or_reconnect(&self) -> Option<ConnectionManager> {
        if let Some(manager) = self.manager.read().await.clone() {
            return Some(manager);
        }

        let mut gate = self.reconnect.lock().await;
        // Another caller may have connected while this one waited.
        if let Some(manager) = self.manager.read().await.clone() {
            return Some(manager);
        }
        if !gate.try_begin(Instant::now()) {
            return None;
        }

        match self.open().await {
            Ok(()) => {
                tracing::info!("Redis reconnected");
                self.manager.read().await.clone()
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    retry_in_secs = gate.interval.as_secs(),
                    "Redis reconnect failed"
                );
                None
            }
        }
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// PUBLISH `payload` on `channel`. Returns the number of receivers, or
    /// `None` when there is no connection and none could be opened.
    pub(crate) async fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> Result<Option<i64>, RedisError> {
        let Some(mut manager) = self.current_or_reconnect().await else {
            return Ok(None);
        };

        let receivers: i64 =
            cmd("PUBLISH").arg(channel).arg(payload).query_async(&mut manager).await?;
        Ok(Some(receivers))
    }
}
