use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::backoff::{Backoff, BackoffConfig};
use crate::client::transport::{ChannelError, Connector, Transport, WsConnector};
use crate::core::config::LiveSettings;
use crate::events::CompletionEvent;

const PING_FRAME: &str = r#"{"type":"ping"}"#;

pub(crate) type EventCallback = Arc<dyn Fn(&CompletionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelConfig {
    pub(crate) backoff: BackoffConfig,
    pub(crate) heartbeat: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { backoff: BackoffConfig::default(), heartbeat: Duration::from_secs(25) }
    }
}

/// The one live connection of a client process.
///
/// Cloning shares the connection. It is opened by the first `subscribe`,
/// survives every subscriber going away, and is only closed by `shutdown`.
/// Callbacks run on the connection task, one event at a time; a panicking
/// callback is isolated from the others.
#[derive(Clone)]
pub(crate) struct LiveChannel {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    subscribers: Mutex<HashMap<u64, EventCallback>>,
    next_subscriber: AtomicU64,
    state: watch::Sender<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

/// Keeps a callback registered. Dropping it unregisters the callback but
/// leaves the connection open.
pub(crate) struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.subscribers).remove(&self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LiveChannel {
    pub(crate) fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                state,
                outbound: Mutex::new(None),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// A WebSocket channel to `url`, tuned by the `LIVE_*` settings.
    pub(crate) fn websocket(url: impl Into<String>, live: &LiveSettings) -> Self {
        Self::new(
            Arc::new(WsConnector::new(url)),
            ChannelConfig {
                backoff: BackoffConfig::from_settings(live),
                heartbeat: Duration::from_secs(live.heartbeat_seconds),
            },
        )
    }

    /// Register a callback for every inbound event. Must be called inside
    /// a Tokio runtime; the first call opens the connection.
    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CompletionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).insert(id, Arc::new(callback));
        self.ensure_started();
        Subscription { id, inner: Arc::downgrade(&self.inner) }
    }

    /// Resolve with the first event for `job_id`. `None` once the channel
    /// has been shut down.
    pub(crate) async fn wait_for_job(&self, job_id: i64) -> Option<CompletionEvent> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let _subscription = self.subscribe(move |event| {
            if event.job_id == job_id {
                if let Some(tx) = lock(&slot).take() {
                    let _ = tx.send(event.clone());
                }
            }
        });

        tokio::select! {
            _ = self.inner.cancel.cancelled() => None,
            event = rx => event.ok(),
        }
    }

    /// Best effort: returns `false` and drops the frame when not connected.
    pub(crate) fn send(&self, text: impl Into<String>) -> bool {
        let sent = match lock(&self.inner.outbound).as_ref() {
            Some(outbound) => outbound.send(text.into()).is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!("Live channel is not connected; frame dropped");
        }
        sent
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    pub(crate) fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    fn ensure_started(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(drive(self.inner.clone()));
    }
}

impl Inner {
    fn set_state(&self, next: ChannelState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Live channel state changed");
        }
    }

    fn dispatch(&self, text: &str) {
        let event = match serde_json::from_str::<CompletionEvent>(text) {
            Ok(event) => event,
            // Pongs and anything malformed.
            Err(_) => {
                tracing::trace!(frame = %text, "Dropping non-event frame");
                return;
            }
        };

        let callbacks: Vec<EventCallback> = lock(&self.subscribers).values().cloned().collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::warn!(job_id = event.job_id, "Live channel subscriber panicked");
            }
        }
    }
}

async fn drive(inner: Arc<Inner>) {
    let mut backoff = Backoff::new(inner.config.backoff);

    loop {
        inner.set_state(ChannelState::Connecting);
        let connected = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            connected = inner.connector.connect() => connected,
        };

        match connected {
            Ok(transport) => {
                backoff.reset();
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&inner.outbound) = Some(tx);
                inner.set_state(ChannelState::Connected);
                tracing::info!("Live channel connected");

                let outcome = run_connection(&inner, transport, rx).await;
                *lock(&inner.outbound) = None;
                match outcome {
                    Ok(()) => break,
                    Err(err) => tracing::warn!(error = %err, "Live channel dropped"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "Live channel connect failed"),
        }

        inner.set_state(ChannelState::Disconnected);
        let delay = backoff.on_failure();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Live channel reconnect scheduled");
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_state(ChannelState::Disconnected);
    tracing::info!("Live channel stopped");
}

/// Pump one connection until it fails (`Err`) or the channel is shut
/// down (`Ok`).
async fn run_connection(
    inner: &Inner,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> Result<(), ChannelError> {
    let period = inner.config.heartbeat;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return Ok(()),
            _ = heartbeat.tick() => transport.send_text(PING_FRAME.to_string()).await?,
            Some(text) = outbound.recv() => transport.send_text(text).await?,
            frame = transport.next_text() => match frame? {
                Some(text) => inner.dispatch(&text),
                None => return Err(ChannelError::Closed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{ChannelConfig, ChannelState, LiveChannel};
    use crate::client::backoff::BackoffConfig;
    use crate::test_support::ScriptedConnector;

    fn fast_config() -> ChannelConfig {
        ChannelConfig {
            backoff: BackoffConfig {
                floor: Duration::from_millis(10),
                cap: Duration::from_millis(40),
                max_jitter: Duration::ZERO,
            },
            heartbeat: Duration::from_secs(60),
        }
    }

    fn event_frame(job_id: i64) -> String {
        json!({"event": "GRADE_ITEM", "job_id": job_id, "status": "succeeded"}).to_string()
    }

    async fn wait_for_state(channel: &LiveChannel, wanted: ChannelState) {
        let mut states = channel.state_changes();
        tokio::time::timeout(Duration::from_secs(2), states.wait_for(|state| *state == wanted))
            .await
            .expect("state reached in time")
            .expect("channel alive");
    }

    #[tokio::test]
    async fn connection_opens_lazily_and_is_shared() {
        let connector = Arc::new(ScriptedConnector::new());
        let _server = connector.accept_next();
        let channel = LiveChannel::new(connector.clone(), fast_config());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(channel.state(), ChannelState::Disconnected);

        let first = channel.subscribe(|_| {});
        let second = channel.clone().subscribe(|_| {});
        wait_for_state(&channel, ChannelState::Connected).await;
        assert_eq!(channel.subscriber_count(), 2);

        drop(first);
        drop(second);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(connector.attempts(), 1);

        channel.shutdown();
        wait_for_state(&channel, ChannelState::Disconnected).await;
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept_next();
        let channel = LiveChannel::new(connector, fast_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _bad = channel.subscribe(|_| panic!("subscriber bug"));
        let _good = channel.subscribe(move |event| {
            let _ = tx.send(event.job_id);
        });
        wait_for_state(&channel, ChannelState::Connected).await;

        server.push(event_frame(1));
        server.push(event_frame(2));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.expect("in time");
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.expect("in time");
        assert_eq!((first, second), (Some(1), Some(2)));

        channel.shutdown();
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept_next();
        let channel = LiveChannel::new(connector, fast_config());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = channel.subscribe(move |event| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(event.job_id);
        });
        wait_for_state(&channel, ChannelState::Connected).await;

        server.push("not json".to_string());
        server.push(r#"{"type":"pong"}"#.to_string());
        server.push(event_frame(9));

        let job_id = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.expect("in time");
        assert_eq!(job_id, Some(9));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(channel.state(), ChannelState::Connected);

        channel.shutdown();
    }

    #[tokio::test]
    async fn dropped_connection_is_reestablished() {
        let connector = Arc::new(ScriptedConnector::new());
        let first = connector.accept_next();
        connector.refuse_next();
        let second = connector.accept_next();
        let channel = LiveChannel::new(connector.clone(), fast_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = channel.subscribe(move |event| {
            let _ = tx.send(event.job_id);
        });
        wait_for_state(&channel, ChannelState::Connected).await;

        let mut states = channel.state_changes();
        first.close();
        tokio::time::timeout(Duration::from_secs(2), states.wait_for(|state| *state != ChannelState::Connected))
            .await
            .expect("disconnect noticed")
            .expect("channel alive");
        wait_for_state(&channel, ChannelState::Connected).await;
        assert_eq!(connector.attempts(), 3);

        second.push(event_frame(5));
        let job_id = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.expect("in time");
        assert_eq!(job_id, Some(5));

        channel.shutdown();
    }

    #[tokio::test]
    async fn send_is_a_no_op_while_disconnected() {
        let connector = Arc::new(ScriptedConnector::new());
        let mut server = connector.accept_next();
        let channel = LiveChannel::new(connector, fast_config());

        assert!(!channel.send(r#"{"type":"subscribe","submission_id":1}"#));

        let _subscription = channel.subscribe(|_| {});
        wait_for_state(&channel, ChannelState::Connected).await;
        assert!(channel.send(r#"{"type":"subscribe","submission_id":1}"#));

        let frame = tokio::time::timeout(Duration::from_secs(2), server.next_sent())
            .await
            .expect("in time");
        assert_eq!(frame.as_deref(), Some(r#"{"type":"subscribe","submission_id":1}"#));

        channel.shutdown();
    }

    #[tokio::test]
    async fn heartbeat_pings_while_connected() {
        let connector = Arc::new(ScriptedConnector::new());
        let mut server = connector.accept_next();
        let channel = LiveChannel::new(
            connector,
            ChannelConfig { heartbeat: Duration::from_millis(20), ..fast_config() },
        );

        let _subscription = channel.subscribe(|_| {});
        let frame = tokio::time::timeout(Duration::from_secs(2), server.next_sent())
            .await
            .expect("in time");
        assert_eq!(frame.as_deref(), Some(r#"{"type":"ping"}"#));

        channel.shutdown();
    }

    #[tokio::test]
    async fn wait_for_job_ignores_other_jobs() {
        let connector = Arc::new(ScriptedConnector::new());
        let server = connector.accept_next();
        let channel = LiveChannel::new(connector, fast_config());

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.wait_for_job(8).await })
        };
        wait_for_state(&channel, ChannelState::Connected).await;

        server.push(event_frame(7));
        server.push(event_frame(8));

        let event = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("in time")
            .expect("join")
            .expect("event");
        assert_eq!(event.job_id, 8);

        channel.shutdown();
    }
}
