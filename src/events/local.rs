use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{BusError, CompletionEvent, EventBus, EventStream, Topic};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus over a `broadcast` channel. Only reaches subscribers in
/// the publishing process.
pub(crate) struct LocalEventBus {
    sender: broadcast::Sender<(Topic, CompletionEvent)>,
}

impl LocalEventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, topic: &Topic, event: &CompletionEvent) -> Result<usize, BusError> {
        // A send error only means nobody is subscribed.
        Ok(self.sender.send((*topic, event.clone())).unwrap_or(0))
    }

    async fn subscribe(&self, topic: Topic) -> Result<EventStream, BusError> {
        let receiver = self.sender.subscribe();

        let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((published, event)) if topic.accepts(&published) => {
                        return Some((event, receiver));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event subscriber lagged; events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::LocalEventBus;
    use crate::db::types::JobStatus;
    use crate::events::{CompletionEvent, EventBus, Topic};

    fn event(job_id: i64, submission_id: Option<i64>) -> CompletionEvent {
        CompletionEvent {
            event: "GRADE_ITEM".to_string(),
            job_id,
            status: JobStatus::Succeeded,
            result: None,
            error: None,
            submission_id,
            submission_item_id: None,
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let bus = LocalEventBus::default();
        let mut all = bus.subscribe(Topic::All).await.expect("subscribe");
        let mut seven = bus.subscribe(Topic::Submission(7)).await.expect("subscribe");

        let other = event(1, Some(8));
        let mine = event(2, Some(7));
        bus.publish(&other.topic(), &other).await.expect("publish");
        bus.publish(&mine.topic(), &mine).await.expect("publish");

        assert_eq!(all.next().await.expect("event").job_id, 1);
        assert_eq!(all.next().await.expect("event").job_id, 2);
        assert_eq!(seven.next().await.expect("event").job_id, 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = LocalEventBus::default();
        let reached = bus.publish(&Topic::Unrouted, &event(1, None)).await.expect("publish");
        assert_eq!(reached, 0);

        let mut late = bus.subscribe(Topic::All).await.expect("subscribe");
        let nothing = tokio::time::timeout(Duration::from_millis(50), late.next()).await;
        assert!(nothing.is_err());
    }
}
