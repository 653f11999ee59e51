use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::{mpsc, watch, RwLock};
use time::PrimitiveDateTime;

use crate::core::time::primitive_now_utc;
use crate::events::CompletionEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) type LiveSender = mpsc::UnboundedSender<Message>;

struct LiveConnection {
    sender: LiveSender,
    /// Empty means every submission.
    submissions: HashSet<i64>,
    connected_at: PrimitiveDateTime,
}

impl LiveConnection {
    fn wants(&self, event: &CompletionEvent) -> bool {
        if self.submissions.is_empty() {
            return true;
        }
        event.submission_id.is_some_and(|id| self.submissions.contains(&id))
    }
}

/// Every live connection of this API process.
#[derive(Clone, Default)]
pub(crate) struct LiveHub {
    connections: Arc<RwLock<HashMap<String, LiveConnection>>>,
}

impl LiveHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the receiver feeds its socket sink.
    pub(crate) async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection =
            LiveConnection { sender: tx, submissions: HashSet::new(), connected_at: primitive_now_utc() };

        let mut connections = self.connections.write().await;
        connections.insert(conn_id, connection);
        metrics::gauge!("live_connections").set(connections.len() as f64);
        rx
    }

    pub(crate) async fn remove(&self, conn_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(conn_id) {
            tracing::debug!(
                conn_id,
                connected_at = %crate::core::time::format_primitive(connection.connected_at),
                "Live connection removed"
            );
        }
        metrics::gauge!("live_connections").set(connections.len() as f64);
    }

    pub(crate) async fn subscribe(&self, conn_id: &str, submission_id: i64) {
        if let Some(connection) = self.connections.write().await.get_mut(conn_id) {
            connection.submissions.insert(submission_id);
        }
    }

    pub(crate) async fn unsubscribe(&self, conn_id: &str, submission_id: i64) {
        if let Some(connection) = self.connections.write().await.get_mut(conn_id) {
            connection.submissions.remove(&submission_id);
        }
    }

    pub(crate) async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        match self.connections.read().await.get(conn_id) {
            Some(connection) => connection.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Forward one event as a single text frame to every interested
    /// connection. Returns how many connections it was queued for.
    pub(crate) async fn deliver(&self, event: &CompletionEvent) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(job_id = event.job_id, error = %err, "Failed to encode event frame");
                return 0;
            }
        };

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for connection in connections.values().filter(|connection| connection.wants(event)) {
            // Closed senders are cleaned up by their own receive loop.
            if connection.sender.send(Message::Text(frame.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub(crate) async fn ping_all(&self) {
        let connections = self.connections.read().await;
        for connection in connections.values() {
            let _ = connection.sender.send(Message::Ping(Vec::new()));
        }
    }

    pub(crate) async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub(crate) async fn close_all(&self) {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        for connection in connections.values() {
            let _ = connection.sender.send(Message::Close(None));
        }
        connections.clear();
        metrics::gauge!("live_connections").set(0.0);
        tracing::info!(count, "Closed all live connections");
    }
}

/// Ping every connection periodically so idle proxies keep them open.
pub(crate) fn start_heartbeat(
    hub: LiveHub,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    let count = hub.connection_count().await;
                    tracing::debug!(count, "Live channel heartbeat ping");
                    hub.ping_all().await;
                }
            }
        }
    })
}
