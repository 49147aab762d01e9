//! Queue preparation outside the timed window

use std::sync::Arc;
use std::time::Duration;

use beanbench_queue::QueueConnector;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::RunConfig;
use crate::error::BenchError;
use crate::metrics::PoolReport;
use crate::publisher::PublisherPool;

/// Outcome of the drain step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Jobs removed from the tube
    pub drained: u64,
    /// Reserved jobs the server refused to delete
    pub delete_failures: u64,
}

/// Reserve and delete jobs from `tube` until a reservation window stays empty
///
/// A rejected delete is logged and counted; the job stays reserved by the
/// draining connection and goes back to the tube when that connection closes.
#[instrument(skip(connector))]
pub async fn drain(
    connector: Arc<dyn QueueConnector>,
    host: &str,
    tube: &str,
    window: Duration,
) -> Result<DrainReport, BenchError> {
    let mut conn = connector
        .connect(host, tube)
        .await
        .map_err(BenchError::Setup)?;

    let mut report = DrainReport::default();
    while let Some(job) = conn.reserve(window).await.map_err(BenchError::Setup)? {
        if let Err(e) = conn.delete(job.id).await {
            report.delete_failures += 1;
            warn!(job_id = job.id, error = %e, "Drain delete failed");
            continue;
        }
        report.drained += 1;
        if report.drained % 10_000 == 0 {
            debug!(drained = report.drained, "Draining");
        }
    }

    info!(
        drained = report.drained,
        delete_failures = report.delete_failures,
        "Queue drained"
    );
    Ok(report)
}

/// Put `config.prefill` jobs through a single connection and wait for them
pub async fn prefill(
    connector: Arc<dyn QueueConnector>,
    config: &RunConfig,
) -> Result<PoolReport, BenchError> {
    let report = PublisherPool::new(connector, config.prefill_config())
        .run()
        .await?;

    info!(jobs = report.completed, "Queue prefilled");
    Ok(report)
}
