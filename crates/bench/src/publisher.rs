//! Publisher pool
//!
//! Puts a fixed number of jobs through one connection group. Submissions run
//! on a bounded set of workers that claim jobs from a shared counter, so the
//! number of concurrent puts never exceeds `max_in_flight`.

use std::sync::Arc;
use std::time::Instant;

use beanbench_queue::{ConnectionGroup, PutParams, QueueConnector, QueueError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::config::PublisherConfig;
use crate::counter::OperationCounter;
use crate::error::BenchError;
use crate::metrics::{LatencyHistogram, PoolReport, Role};
use crate::signal::{completion, CompletionSignal};

/// Concurrent job submitter
pub struct PublisherPool {
    connector: Arc<dyn QueueConnector>,
    config: PublisherConfig,
}

impl PublisherPool {
    pub fn new(connector: Arc<dyn QueueConnector>, config: PublisherConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Run the pool on its own task and return its completion signal
    pub fn launch(self) -> CompletionSignal {
        if self.config.job_count == 0 {
            return CompletionSignal::ready(Role::Publisher, Ok(PoolReport::empty()));
        }

        let (completer, signal) = completion(Role::Publisher);
        tokio::spawn(async move {
            let outcome = self.run().await;
            completer.complete(outcome);
        });
        signal
    }

    /// Submit every job and report
    #[instrument(
        name = "publisher_pool",
        skip(self),
        fields(host = %self.config.host, concurrency = self.config.concurrency)
    )]
    pub async fn run(self) -> Result<PoolReport, BenchError> {
        if self.config.job_count == 0 {
            return Ok(PoolReport::empty());
        }

        let group = Arc::new(ConnectionGroup::open(
            Arc::clone(&self.connector),
            self.config.host.clone(),
            self.config.tube.clone(),
            self.config.concurrency,
        ));

        if !group.wait_healthy(self.config.health_timeout).await {
            group.close().await;
            return Err(BenchError::NotHealthy {
                host: group.host().to_string(),
                waited: self.config.health_timeout,
            });
        }

        let outcome = self.submit_all(&group).await;
        group.close().await;
        outcome
    }

    async fn submit_all(&self, group: &Arc<ConnectionGroup>) -> Result<PoolReport, BenchError> {
        let counter = Arc::new(OperationCounter::new(self.config.job_count));
        let latency = Arc::new(LatencyHistogram::new());
        let body: Arc<[u8]> = vec![0u8; self.config.payload_size].into();
        let params = PutParams::default().with_ttr(self.config.ttr);
        let worker_count = self.config.worker_count();

        info!(
            jobs = self.config.job_count,
            connections = group.size(),
            workers = worker_count,
            payload_size = self.config.payload_size,
            "Publishing jobs"
        );

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            workers.spawn(submit_loop(
                worker,
                Arc::clone(group),
                Arc::clone(&counter),
                Arc::clone(&body),
                params.clone(),
                Arc::clone(&latency),
            ));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => BenchError::Enqueue(e),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => BenchError::Worker {
                    role: Role::Publisher,
                    message: e.to_string(),
                },
            };

            if failure.is_none() {
                error!(error = %err, completed = counter.completed(), "Publishing failed, stopping workers");
                workers.abort_all();
                failure = Some(err);
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        debug!(completed = counter.completed(), "All jobs published");
        Ok(PoolReport {
            completed: counter.completed(),
            latency: latency.summary(),
            ..PoolReport::default()
        })
    }
}

async fn submit_loop(
    worker: usize,
    group: Arc<ConnectionGroup>,
    counter: Arc<OperationCounter>,
    body: Arc<[u8]>,
    params: PutParams,
    latency: Arc<LatencyHistogram>,
) -> Result<(), QueueError> {
    while counter.claim() {
        let started = Instant::now();
        let put = async {
            let mut lease = group.checkout().await?;
            lease.put(&body, &params).await
        };

        match put.await {
            Ok(_) => {
                latency.record(started.elapsed());
                counter.commit();
            }
            Err(e) => {
                counter.abandon();
                debug!(worker, error = %e, "Put failed");
                return Err(e);
            }
        }
    }
    Ok(())
}
