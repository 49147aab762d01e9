//! Benchmark driver
//!
//! Runs the optional setup steps, then times both pools from one shared start
//! instant. The publisher signal is awaited first and the reader signal second;
//! each role's elapsed time is measured from the common start.

use std::sync::Arc;

use beanbench_queue::QueueConnector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::{RunConfig, RESERVE_TIMEOUT};
use crate::consumer::ConsumerPool;
use crate::error::BenchError;
use crate::metrics::{PoolReport, Role, RoleReport, RunMetrics};
use crate::publisher::PublisherPool;
use crate::setup::{self, DrainReport};
use crate::signal::CompletionSignal;

/// Result of one benchmark run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Wall-clock start of the timed window
    pub started_at: DateTime<Utc>,
    pub config: RunConfig,
    /// Outcome of the drain step, if it ran
    pub drained: Option<DrainReport>,
    /// Jobs put by the prefill step, if it ran
    pub prefilled: Option<u64>,
    pub publishers: Option<RoleReport>,
    pub readers: Option<RoleReport>,
}

impl RunSummary {
    /// Report for `role`, if that role ran
    pub fn role(&self, role: Role) -> Option<&RoleReport> {
        match role {
            Role::Publisher => self.publishers.as_ref(),
            Role::Reader => self.readers.as_ref(),
        }
    }
}

/// Times publishers and readers against one queue host
pub struct BenchmarkDriver {
    connector: Arc<dyn QueueConnector>,
    config: RunConfig,
}

impl BenchmarkDriver {
    pub fn new(connector: Arc<dyn QueueConnector>, config: RunConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the benchmark to completion
    #[instrument(name = "benchmark", skip(self), fields(host = %self.config.host))]
    pub async fn execute(&self) -> Result<RunSummary, BenchError> {
        let config = &self.config;

        let drained = if config.drain {
            info!(tube = %config.tube, "Draining queue");
            let drained = setup::drain(
                Arc::clone(&self.connector),
                &config.host,
                &config.tube,
                RESERVE_TIMEOUT,
            )
            .await?;
            Some(drained)
        } else {
            None
        };

        let prefilled = if config.prefill > 0 {
            info!(jobs = config.prefill, "Filling queue");
            let report = setup::prefill(Arc::clone(&self.connector), config).await?;
            Some(report.completed)
        } else {
            None
        };

        info!(
            host = %config.host,
            publishers = config.publishers,
            readers = config.readers,
            jobs = config.job_count,
            "Benchmarking, be patient ..."
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let publisher_signal = (config.publishers > 0).then(|| {
            PublisherPool::new(Arc::clone(&self.connector), config.publisher_config()).launch()
        });

        let (reader_signal, reader_cancel) = if config.readers > 0 {
            let pool = ConsumerPool::new(Arc::clone(&self.connector), config.consumer_config());
            let cancel = pool.cancel_handle();
            (Some(pool.launch()), Some(cancel))
        } else {
            (None, None)
        };

        let publishers = match publisher_signal {
            Some(signal) => match signal.wait().await {
                Ok(pool) => {
                    let report = self.role_report(Role::Publisher, pool, start);
                    info!(
                        elapsed = ?report.metrics.elapsed,
                        rate = report.metrics.rate,
                        "Publishers finished"
                    );
                    Some(report)
                }
                Err(e) => {
                    if let Some(cancel) = reader_cancel {
                        cancel.cancel();
                    }
                    if let Some(signal) = reader_signal {
                        stop_readers(signal).await;
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        let readers = match reader_signal {
            Some(signal) => {
                let pool = signal.wait().await?;
                let report = self.role_report(Role::Reader, pool, start);
                info!(
                    elapsed = ?report.metrics.elapsed,
                    rate = report.metrics.rate,
                    "Readers finished"
                );
                Some(report)
            }
            None => None,
        };

        Ok(RunSummary {
            started_at,
            config: config.clone(),
            drained,
            prefilled,
            publishers,
            readers,
        })
    }

    fn role_report(&self, role: Role, pool: PoolReport, start: Instant) -> RoleReport {
        RoleReport {
            role,
            metrics: RunMetrics::new(self.config.job_count, start.elapsed()),
            pool,
        }
    }
}

async fn stop_readers(signal: CompletionSignal) {
    match signal.wait().await {
        Ok(_) | Err(BenchError::Cancelled { .. }) => {}
        Err(e) => warn!(error = %e, "Reader pool failed while stopping"),
    }
}
