use std::time::Duration;

use crate::core::time::{primitive_now_utc, subtract_std};
use crate::jobs::{FailureKind, JobFailure, StoreError};
use crate::tasks::Pipeline;

/// Fail every job that has been `running` for longer than `timeout` and
/// publish its failure event. Jobs are never moved back to `pending`.
pub(crate) async fn fail_stale_jobs(pipeline: &Pipeline, timeout: Duration) -> Result<usize, StoreError> {
    let cutoff = subtract_std(primitive_now_utc(), timeout);
    let stale = pipeline.jobs.list_stale_running(cutoff).await?;

    if stale.is_empty() {
        return Ok(0);
    }

    let mut failed = 0;
    for job in stale {
        let owner = job.claimed_by.as_deref().unwrap_or("unknown worker");
        let failure = JobFailure::new(
            FailureKind::Stale,
            format!("no result after {}s while claimed by {owner}", timeout.as_secs()),
        );

        match pipeline.jobs.mark_failed(job.id, failure).await {
            Ok(finished) => {
                failed += 1;
                tracing::warn!(job_id = job.id, kind = %job.kind, claimed_by = %owner, "Stale job failed");
                pipeline.publish_completion(&finished).await;
            }
            // Finished by its worker since the scan.
            Err(StoreError::InvalidTransition { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    tracing::info!(failed, "Stale job sweep completed");
    metrics::counter!("stale_jobs_failed_total").increment(failed as u64);

    Ok(failed)
}
