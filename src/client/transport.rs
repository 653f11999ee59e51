use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Transport-level failures. Never surfaced to subscribers; they only
/// trigger a reconnect.
#[derive(Debug, Error)]
pub(crate) enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed by peer")]
    Closed,
}

/// One open duplex connection carrying text frames.
#[async_trait]
pub(crate) trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next inbound text frame. `Ok(None)` once the peer has closed.
    async fn next_text(&mut self) -> Result<Option<String>, ChannelError>;
}

#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError>;
}

/// Opens WebSocket connections to the live-channel endpoint.
#[derive(Debug, Clone)]
pub(crate) struct WsConnector {
    url: String,
}

impl WsConnector {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ChannelError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| ChannelError::Connect(err.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))
    }

    async fn next_text(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Protocol pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(ChannelError::Transport(err.to_string())),
            }
        }
    }
}
