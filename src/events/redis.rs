use async_trait::async_trait;
use futures::StreamExt;
use redis::Client;

use super::{BusError, CompletionEvent, EventBus, EventStream, Topic, CHANNEL_PREFIX};
use crate::core::redis::RedisHandle;

/// Cross-process bus over Redis pub/sub. Publishing reuses the shared
/// connection manager; each subscription opens its own pub/sub connection.
#[derive(Clone)]
pub(crate) struct RedisEventBus {
    redis: RedisHandle,
}

impl RedisEventBus {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &Topic, event: &CompletionEvent) -> Result<usize, BusError> {
        let payload = serde_json::to_string(event)?;
        let receivers = self
            .redis
            .publish(&topic.channel(), &payload)
            .await?
            .ok_or(BusError::NotConnected)?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError> {
        let client = Client::open(self.redis.url())?;
        let mut pubsub = client.get_async_pubsub().await?;

        match topic {
            Topic::All => pubsub.psubscribe(format!("{CHANNEL_PREFIX}:*")).await?,
            other => {
                pubsub.subscribe(other.channel()).await?;
                pubsub.subscribe(Topic::All.channel()).await?;
            }
        }

        let stream = pubsub.into_on_message().filter_map(|message| async move {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "Dropping non-text bus message");
                    return None;
                }
            };

            match serde_json::from_str::<CompletionEvent>(&payload) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(error = %err, "Dropping malformed bus message");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
