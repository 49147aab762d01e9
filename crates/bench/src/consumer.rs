//! Consumer pool
//!
//! Reserves and deletes jobs until a target count has been acknowledged. The
//! worker whose delete reaches the target cancels the pool; every other worker
//! observes the cancellation and exits. Jobs reserved after the target is
//! fully claimed are released back to the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use beanbench_queue::{ConnectionGroup, Job, Lease, QueueConnector, DEFAULT_PRIORITY};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConsumerConfig, RESERVE_ERROR_BACKOFF};
use crate::counter::OperationCounter;
use crate::error::BenchError;
use crate::metrics::{LatencyHistogram, PoolReport, Role};
use crate::signal::{completion, CompletionSignal};

/// Concurrent job reserver
pub struct ConsumerPool {
    connector: Arc<dyn QueueConnector>,
    config: ConsumerConfig,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ReaderStats {
    ack_failures: AtomicU64,
    released: AtomicU64,
    reserve_errors: AtomicU64,
}

/// State shared by every reservation worker of one pool
struct ReaderContext {
    group: ConnectionGroup,
    counter: OperationCounter,
    cancel: CancellationToken,
    latency: LatencyHistogram,
    stats: ReaderStats,
    reserve_timeout: Duration,
}

impl ConsumerPool {
    pub fn new(connector: Arc<dyn QueueConnector>, config: ConsumerConfig) -> Self {
        Self {
            connector,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Token that stops the pool early when cancelled
    ///
    /// A pool stopped this way reports [`BenchError::Cancelled`].
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pool on its own task and return its completion signal
    pub fn launch(self) -> CompletionSignal {
        if self.config.job_count == 0 {
            return CompletionSignal::ready(Role::Reader, Ok(PoolReport::empty()));
        }

        let (completer, signal) = completion(Role::Reader);
        tokio::spawn(async move {
            let outcome = self.run().await;
            completer.complete(outcome);
        });
        signal
    }

    /// Consume jobs until the target is acknowledged
    #[instrument(
        name = "consumer_pool",
        skip(self),
        fields(host = %self.config.host, concurrency = self.config.concurrency)
    )]
    pub async fn run(self) -> Result<PoolReport, BenchError> {
        if self.config.job_count == 0 {
            return Ok(PoolReport::empty());
        }

        let group = ConnectionGroup::open(
            Arc::clone(&self.connector),
            self.config.host.clone(),
            self.config.tube.clone(),
            self.config.concurrency,
        );

        let healthy = tokio::select! {
            healthy = group.wait_healthy(self.config.health_timeout) => healthy,
            _ = self.cancel.cancelled() => {
                group.close().await;
                return Err(self.cancelled(0));
            }
        };
        if !healthy {
            let host = group.host().to_string();
            group.close().await;
            return Err(BenchError::NotHealthy {
                host,
                waited: self.config.health_timeout,
            });
        }

        let ctx = Arc::new(ReaderContext {
            group,
            counter: OperationCounter::new(self.config.job_count),
            cancel: self.cancel.child_token(),
            latency: LatencyHistogram::new(),
            stats: ReaderStats::default(),
            reserve_timeout: self.config.reserve_timeout,
        });

        info!(
            jobs = self.config.job_count,
            workers = self.config.workers,
            "Consuming jobs"
        );

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            workers.spawn(reserve_loop(worker, Arc::clone(&ctx)));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_cancelled() {
                    continue;
                }
                error!(error = %e, "Reservation worker failed");
                ctx.cancel.cancel();
                failure.get_or_insert(BenchError::Worker {
                    role: Role::Reader,
                    message: e.to_string(),
                });
            }
        }

        // Every worker has exited; no reservation is in flight past this point.
        ctx.group.close().await;

        if let Some(err) = failure {
            return Err(err);
        }

        if !ctx.counter.is_done() {
            return Err(BenchError::Cancelled {
                role: Role::Reader,
                completed: ctx.counter.completed(),
                target: ctx.counter.target(),
            });
        }

        let completed = ctx.counter.completed();

        let report = PoolReport {
            completed,
            ack_failures: ctx.stats.ack_failures.load(Ordering::Relaxed),
            released: ctx.stats.released.load(Ordering::Relaxed),
            reserve_errors: ctx.stats.reserve_errors.load(Ordering::Relaxed),
            latency: ctx.latency.summary(),
        };
        debug!(?report, "All jobs consumed");
        Ok(report)
    }

    fn cancelled(&self, completed: u64) -> BenchError {
        BenchError::Cancelled {
            role: Role::Reader,
            completed,
            target: self.config.job_count,
        }
    }
}

async fn reserve_loop(worker: usize, ctx: Arc<ReaderContext>) {
    loop {
        let mut lease = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            lease = ctx.group.checkout() => match lease {
                Ok(lease) => lease,
                Err(e) => {
                    ctx.stats.reserve_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(worker, error = %e, "No connection available");
                    if backoff(&ctx.cancel).await {
                        break;
                    }
                    continue;
                }
            },
        };

        let reserved = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            reserved = lease.reserve(ctx.reserve_timeout) => reserved,
        };

        let job = match reserved {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                let slot = lease.slot();
                drop(lease);
                ctx.stats.reserve_errors.fetch_add(1, Ordering::Relaxed);
                warn!(worker, slot, error = %e, "Reserve failed");
                if backoff(&ctx.cancel).await {
                    break;
                }
                continue;
            }
        };

        if !ctx.counter.claim() {
            hand_back(worker, &ctx, &mut lease, &job).await;
            drop(lease);
            // Target fully claimed; wait for the finishing delete or an abandon.
            if backoff(&ctx.cancel).await {
                break;
            }
            continue;
        }

        let started = Instant::now();
        match lease.delete(job.id).await {
            Ok(()) => {
                ctx.latency.record(started.elapsed());
                if ctx.counter.commit() {
                    info!(worker, completed = ctx.counter.completed(), "Target reached");
                    ctx.cancel.cancel();
                }
            }
            Err(e) => {
                ctx.counter.abandon();
                ctx.stats.ack_failures.fetch_add(1, Ordering::Relaxed);
                warn!(worker, slot = lease.slot(), job_id = job.id, error = %e, "Delete failed");
            }
        }
    }

    debug!(worker, "Reservation worker exited");
}

async fn hand_back(worker: usize, ctx: &ReaderContext, lease: &mut Lease<'_>, job: &Job) {
    match lease.release(job.id, DEFAULT_PRIORITY).await {
        Ok(()) => {
            ctx.stats.released.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            debug!(worker, job_id = job.id, error = %e, "Release failed");
        }
    }
}

/// Sleep before retrying; `true` if the pool was cancelled meanwhile
async fn backoff(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(RESERVE_ERROR_BACKOFF) => false,
    }
}

#[cfg(test)]
mod tests {
    use beanbench_queue::InMemoryQueue;

    use super::*;

    fn config(readers: usize, jobs: u64) -> ConsumerConfig {
        ConsumerConfig::new("memory", readers, jobs)
            .with_reserve_timeout(Duration::from_millis(50))
            .with_health_timeout(Duration::from_millis(200))
    }

    fn fill(queue: &InMemoryQueue, jobs: usize) {
        for _ in 0..jobs {
            queue.push("default", vec![0u8; 8]);
        }
    }

    #[tokio::test]
    async fn test_zero_jobs_opens_nothing() {
        let queue = InMemoryQueue::new();
        let pool = ConsumerPool::new(Arc::new(queue.clone()), config(2, 0));

        let report = pool.launch().wait().await.unwrap();
        assert_eq!(report, PoolReport::empty());
        assert_eq!(queue.stats().connects, 0);
        assert_eq!(queue.stats().reserves, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consumes_exact_target_with_surplus() {
        let queue = InMemoryQueue::new();
        fill(&queue, 150);

        let pool = ConsumerPool::new(Arc::new(queue.clone()), config(3, 100));
        let report = pool.run().await.unwrap();

        assert_eq!(report.completed, 100);
        assert_eq!(queue.stats().deletes, 100);
        assert_eq!(queue.stats().delete_misses, 0);
        assert_eq!(queue.reserved_count(), 0);
        assert_eq!(queue.ready_count("default"), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ack_failures_are_counted_not_completed() {
        let queue = InMemoryQueue::new();
        fill(&queue, 25);
        queue.fail_next_deletes(3);

        let pool = ConsumerPool::new(Arc::new(queue.clone()), config(2, 20));
        let report = pool.run().await.unwrap();

        assert_eq!(report.completed, 20);
        assert_eq!(report.ack_failures, 3);
        assert_eq!(queue.stats().deletes, 20);
    }

    #[tokio::test]
    async fn test_external_cancel_reports_progress() {
        let queue = InMemoryQueue::new();
        fill(&queue, 5);

        let pool = ConsumerPool::new(Arc::new(queue.clone()), config(1, 10));
        let cancel = pool.cancel_handle();
        let signal = pool.launch();

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();

        match signal.wait().await {
            Err(BenchError::Cancelled {
                completed, target, ..
            }) => {
                assert_eq!(completed, 5);
                assert_eq!(target, 10);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_queue_not_healthy() {
        let queue = InMemoryQueue::new();
        queue.set_reachable(false);

        let result = ConsumerPool::new(Arc::new(queue), config(1, 1)).run().await;
        match result {
            Err(BenchError::NotHealthy { host, .. }) => assert_eq!(host, "memory"),
            other => panic!("expected NotHealthy, got {other:?}"),
        }
    }
}
