use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::api::ws::LiveHub;
use crate::core::state::AppState;

/// Frames a client may send. Anything else is ignored.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Ping,
    Subscribe { submission_id: i64 },
    Unsubscribe { submission_id: i64 },
}

const PONG_FRAME: &str = r#"{"type":"pong"}"#;

pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: LiveHub) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Live connection opened");

    let mut rx = hub.add(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "Live connection sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => handle_text(&hub, &conn_id, &text).await,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(conn_id = %conn_id, error = %err, "Live connection receive error");
                break;
            }
        }
    }

    hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Live connection closed");
}

async fn handle_text(hub: &LiveHub, conn_id: &str, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(conn_id, error = %err, "Ignoring unrecognised client frame");
            return;
        }
    };

    match frame {
        ClientFrame::Ping => {
            hub.send_to(conn_id, Message::Text(PONG_FRAME.to_string())).await;
        }
        ClientFrame::Subscribe { submission_id } => {
            hub.subscribe(conn_id, submission_id).await;
            tracing::debug!(conn_id, submission_id, "Live connection subscribed");
        }
        ClientFrame::Unsubscribe { submission_id } => {
            hub.unsubscribe(conn_id, submission_id).await;
        }
    }
}
