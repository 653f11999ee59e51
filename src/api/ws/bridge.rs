use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::ws::LiveHub;
use crate::client::backoff::{Backoff, BackoffConfig};
use crate::events::{EventBus, Topic};

/// Feed every bus event into the hub. A dropped subscription (Redis
/// restart, lagging stream end) is re-established with backoff; events
/// published in the gap are lost.
pub(crate) fn spawn_bridge(
    bus: Arc<dyn EventBus>,
    hub: LiveHub,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::new(BackoffConfig::default());

        loop {
            match bus.subscribe(Topic::All).await {
                Ok(mut events) => {
                    backoff.reset();
                    tracing::info!("Live channel bridge subscribed to event bus");

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            next = events.next() => match next {
                                Some(event) => {
                                    let delivered = hub.deliver(&event).await;
                                    tracing::debug!(job_id = event.job_id, delivered, "Event forwarded to live connections");
                                }
                                None => break,
                            },
                        }
                    }
                    tracing::warn!("Event bus subscription ended");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to subscribe to event bus");
                }
            }

            let delay = backoff.on_failure();
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    })
}
