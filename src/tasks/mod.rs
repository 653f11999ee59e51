pub(crate) mod handlers;
pub(crate) mod maintenance;
pub(crate) mod scheduler;
pub(crate) mod worker;

use std::sync::Arc;

use sqlx::PgPool;

use crate::db::models::Job;
use crate::events::{CompletionEvent, EventBus};
use crate::grading::{GradingStore, ItemCatalog, PgGradingStore, PgItemCatalog};
use crate::jobs::{JobStore, PgJobStore};

/// The stores and bus shared by the request layer and worker loops.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) gradings: Arc<dyn GradingStore>,
    pub(crate) catalog: Arc<dyn ItemCatalog>,
    pub(crate) bus: Arc<dyn EventBus>,
}

impl Pipeline {
    pub(crate) fn postgres(pool: PgPool, bus: Arc<dyn EventBus>) -> Self {
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            gradings: Arc::new(PgGradingStore::new(pool.clone())),
            catalog: Arc::new(PgItemCatalog::new(pool)),
            bus,
        }
    }

    /// Publish the completion event for a job that just reached a terminal
    /// status. Bus failures are logged, never propagated.
    pub(crate) async fn publish_completion(&self, job: &Job) {
        let event = CompletionEvent::from_job(job);
        let topic = event.topic();

        match self.bus.publish(&topic, &event).await {
            Ok(receivers) => {
                metrics::counter!("events_published_total").increment(1);
                tracing::debug!(
                    job_id = job.id,
                    kind = %job.kind,
                    status = %job.status,
                    receivers,
                    "Completion event published"
                );
            }
            Err(err) => {
                tracing::warn!(job_id = job.id, error = %err, "Failed to publish completion event");
            }
        }
    }
}
