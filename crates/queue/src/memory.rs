//! In-memory implementation of QueueConnector for testing
//!
//! Follows the beanstalkd semantics the benchmark relies on: a reservation
//! belongs to the connection that made it, is returned to the ready queue when
//! its TTR expires or its connection drops, and can only be deleted or
//! released by its owner.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::client::{Job, JobId, PutParams, QueueConnection, QueueConnector};
use crate::error::QueueError;

/// Snapshot of the queue's call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Connections opened
    pub connects: u64,
    /// Successful puts
    pub puts: u64,
    /// Successful reservations
    pub reserves: u64,
    /// Reservation windows that closed without a job
    pub reserve_timeouts: u64,
    /// Successful deletes
    pub deletes: u64,
    /// Deletes of jobs not reserved by the calling connection
    pub delete_misses: u64,
    /// Successful releases
    pub releases: u64,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    puts: AtomicU64,
    reserves: AtomicU64,
    reserve_timeouts: AtomicU64,
    deletes: AtomicU64,
    delete_misses: AtomicU64,
    releases: AtomicU64,
}

#[derive(Default)]
struct Faults {
    /// Puts that may still succeed before every further put fails
    puts_before_failure: Option<u64>,
    /// Upcoming deletes that fail
    failing_deletes: u64,
}

struct ReadyJob {
    id: JobId,
    body: Vec<u8>,
    ttr: Duration,
    ready_at: Instant,
}

struct ReservedEntry {
    job: ReadyJob,
    tube: String,
    owner: u64,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    ready: HashMap<String, VecDeque<ReadyJob>>,
    reserved: HashMap<JobId, ReservedEntry>,
}

impl State {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<JobId> = self
            .reserved
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(entry) = self.reserved.remove(&id) {
                self.ready.entry(entry.tube).or_default().push_back(entry.job);
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    available: Notify,
    reachable: AtomicBool,
    next_job: AtomicU64,
    next_connection: AtomicU64,
    counters: Counters,
    faults: Mutex<Faults>,
}

/// In-memory job queue
///
/// Cloning is cheap and every clone shares the same queue. The queue itself
/// is the connector: hand an `Arc` of it to anything expecting a
/// [`QueueConnector`].
///
/// # Example
///
/// ```
/// use beanbench_queue::InMemoryQueue;
///
/// let queue = InMemoryQueue::new();
/// queue.push("default", vec![0u8; 16]);
/// assert_eq!(queue.ready_count("default"), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    /// Create an empty, reachable queue
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                available: Notify::new(),
                reachable: AtomicBool::new(true),
                next_job: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
                counters: Counters::default(),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// Simulate an outage: connects fail and open connections turn unhealthy
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::Release);
        self.shared.available.notify_waiters();
    }

    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::Acquire)
    }

    /// Let `n` more puts succeed, then fail every put after that
    pub fn fail_puts_after(&self, n: u64) {
        self.shared.faults.lock().puts_before_failure = Some(n);
    }

    /// Fail the next `n` deletes (the jobs stay reserved)
    pub fn fail_next_deletes(&self, n: u64) {
        self.shared.faults.lock().failing_deletes = n;
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    /// Insert a ready job directly, bypassing connections and counters
    pub fn push(&self, tube: &str, body: Vec<u8>) -> JobId {
        let id = self.insert(tube, body, &PutParams::default());
        self.shared.available.notify_waiters();
        id
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            connects: c.connects.load(Ordering::Relaxed),
            puts: c.puts.load(Ordering::Relaxed),
            reserves: c.reserves.load(Ordering::Relaxed),
            reserve_timeouts: c.reserve_timeouts.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            delete_misses: c.delete_misses.load(Ordering::Relaxed),
            releases: c.releases.load(Ordering::Relaxed),
        }
    }

    /// Ready jobs in `tube`
    pub fn ready_count(&self, tube: &str) -> usize {
        self.shared
            .state
            .lock()
            .ready
            .get(tube)
            .map_or(0, VecDeque::len)
    }

    /// Ready jobs across all tubes
    pub fn total_ready(&self) -> usize {
        self.shared.state.lock().ready.values().map(VecDeque::len).sum()
    }

    /// Jobs currently reserved by any connection
    pub fn reserved_count(&self) -> usize {
        self.shared.state.lock().reserved.len()
    }

    fn insert(&self, tube: &str, body: Vec<u8>, params: &PutParams) -> JobId {
        let id = self.shared.next_job.fetch_add(1, Ordering::Relaxed);
        let job = ReadyJob {
            id,
            body,
            ttr: params.ttr,
            ready_at: Instant::now() + params.delay,
        };
        self.shared
            .state
            .lock()
            .ready
            .entry(tube.to_string())
            .or_default()
            .push_back(job);
        id
    }

    fn take_ready(&self, tube: &str, owner: u64) -> Option<Job> {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        state.requeue_expired(now);

        let queue = state.ready.get_mut(tube)?;
        let position = queue.iter().position(|job| job.ready_at <= now)?;
        let job = queue.remove(position)?;

        let reserved = Job {
            id: job.id,
            body: job.body.clone(),
        };
        let deadline = now + job.ttr;
        state.reserved.insert(
            job.id,
            ReservedEntry {
                job,
                tube: tube.to_string(),
                owner,
                deadline,
            },
        );
        Some(reserved)
    }

    /// Return every job reserved by `owner` to its ready queue
    fn release_owned(&self, owner: u64) {
        let mut state = self.shared.state.lock();
        let owned: Vec<JobId> = state
            .reserved
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, _)| *id)
            .collect();

        if owned.is_empty() {
            return;
        }

        for id in owned {
            if let Some(entry) = state.reserved.remove(&id) {
                state.ready.entry(entry.tube).or_default().push_back(entry.job);
            }
        }
        drop(state);
        self.shared.available.notify_waiters();
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueConnector for InMemoryQueue {
    async fn connect(
        &self,
        host: &str,
        tube: &str,
    ) -> Result<Box<dyn QueueConnection>, QueueError> {
        if !self.is_reachable() {
            return Err(QueueError::Connect {
                host: host.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "in-memory queue unreachable",
                ),
            });
        }

        self.shared.counters.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(InMemoryConnection {
            queue: self.clone(),
            id: self.shared.next_connection.fetch_add(1, Ordering::Relaxed),
            tube: tube.to_string(),
        }))
    }
}

/// Connection to an [`InMemoryQueue`]
pub struct InMemoryConnection {
    queue: InMemoryQueue,
    id: u64,
    tube: String,
}

impl InMemoryConnection {
    fn ensure_reachable(&self) -> Result<(), QueueError> {
        if self.queue.is_reachable() {
            Ok(())
        } else {
            Err(QueueError::Closed)
        }
    }
}

#[async_trait]
impl QueueConnection for InMemoryConnection {
    async fn put(&mut self, body: &[u8], params: &PutParams) -> Result<JobId, QueueError> {
        self.ensure_reachable()?;

        {
            let mut faults = self.queue.shared.faults.lock();
            if let Some(remaining) = faults.puts_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(QueueError::Injected("put rejected".into()));
                }
                *remaining -= 1;
            }
        }

        let id = self.queue.insert(&self.tube, body.to_vec(), params);
        self.queue.shared.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.queue.shared.available.notify_waiters();
        Ok(id)
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.ensure_reachable()?;

            let notified = self.queue.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.queue.take_ready(&self.tube, self.id) {
                self.queue
                    .shared
                    .counters
                    .reserves
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(Some(job));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.queue
                    .shared
                    .counters
                    .reserve_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<(), QueueError> {
        self.ensure_reachable()?;

        {
            let mut faults = self.queue.shared.faults.lock();
            if faults.failing_deletes > 0 {
                faults.failing_deletes -= 1;
                return Err(QueueError::Injected(format!("delete of job {id} rejected")));
            }
        }

        let counters = &self.queue.shared.counters;
        let mut state = self.queue.shared.state.lock();
        let owned = state
            .reserved
            .get(&id)
            .is_some_and(|entry| entry.owner == self.id);

        if owned {
            state.reserved.remove(&id);
            counters.deletes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            counters.delete_misses.fetch_add(1, Ordering::Relaxed);
            Err(QueueError::NotFound(id))
        }
    }

    async fn release(&mut self, id: JobId, _priority: u32) -> Result<(), QueueError> {
        self.ensure_reachable()?;

        {
            let mut state = self.queue.shared.state.lock();
            let owned = state
                .reserved
                .get(&id)
                .is_some_and(|entry| entry.owner == self.id);
            let entry = owned
                .then(|| state.reserved.remove(&id))
                .flatten()
                .ok_or(QueueError::NotFound(id))?;
            state.ready.entry(entry.tube).or_default().push_back(entry.job);
        }

        self.queue
            .shared
            .counters
            .releases
            .fetch_add(1, Ordering::Relaxed);
        self.queue.shared.available.notify_waiters();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.queue.is_reachable()
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.queue.release_owned(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(queue: &InMemoryQueue) -> Box<dyn QueueConnection> {
        queue.connect("mem", "default").await.unwrap()
    }

    #[tokio::test]
    async fn test_put_reserve_delete() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;

        let id = conn.put(&[0u8; 8], &PutParams::default()).await.unwrap();
        assert_eq!(queue.ready_count("default"), 1);

        let job = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.body.len(), 8);
        assert_eq!(queue.reserved_count(), 1);

        conn.delete(id).await.unwrap();
        assert_eq!(queue.reserved_count(), 0);

        let stats = queue.stats();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.reserves, 1);
        assert_eq!(stats.deletes, 1);
    }

    #[tokio::test]
    async fn test_reserve_times_out_on_empty_queue() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;

        let started = std::time::Instant::now();
        let job = conn.reserve(Duration::from_millis(50)).await.unwrap();
        assert!(job.is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(queue.stats().reserve_timeouts, 1);
    }

    #[tokio::test]
    async fn test_reserve_wakes_on_put() {
        let queue = InMemoryQueue::new();
        let mut consumer = connect(&queue).await;
        let mut producer = connect(&queue).await;

        let waiter = tokio::spawn(async move { consumer.reserve(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.put(b"wake", &PutParams::default()).await.unwrap();

        let job = waiter.await.unwrap().unwrap().expect("reserve should wake");
        assert_eq!(job.body, b"wake");
    }

    #[tokio::test]
    async fn test_double_delete_is_a_miss() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        queue.push("default", vec![1]);

        let job = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.delete(job.id).await.unwrap();
        assert!(matches!(
            conn.delete(job.id).await,
            Err(QueueError::NotFound(id)) if id == job.id
        ));
        assert_eq!(queue.stats().delete_misses, 1);
    }

    #[tokio::test]
    async fn test_only_owner_may_delete() {
        let queue = InMemoryQueue::new();
        let mut owner = connect(&queue).await;
        let mut other = connect(&queue).await;
        queue.push("default", vec![1]);

        let job = owner.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert!(other.delete(job.id).await.is_err());
        owner.delete(job.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_returns_job() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        queue.push("default", vec![1]);

        let job = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.release(job.id, 0).await.unwrap();
        assert_eq!(queue.ready_count("default"), 1);
        assert_eq!(queue.reserved_count(), 0);
        assert_eq!(queue.stats().releases, 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_returns_reservations() {
        let queue = InMemoryQueue::new();
        queue.push("default", vec![1]);
        queue.push("default", vec![2]);

        let mut conn = connect(&queue).await;
        conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(queue.reserved_count(), 2);

        drop(conn);
        assert_eq!(queue.reserved_count(), 0);
        assert_eq!(queue.ready_count("default"), 2);
    }

    #[tokio::test]
    async fn test_expired_ttr_requeues() {
        let queue = InMemoryQueue::new();
        let mut first = connect(&queue).await;
        let mut second = connect(&queue).await;
        first
            .put(b"slow", &PutParams::default().with_ttr(Duration::from_secs(1)))
            .await
            .unwrap();

        let job = first.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert!(second.reserve(Duration::ZERO).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let again = second.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
    }

    #[tokio::test]
    async fn test_delayed_job_not_ready_until_delay() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        conn.put(
            b"later",
            &PutParams::default().with_delay(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert!(conn.reserve(Duration::ZERO).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(conn.reserve(Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tubes_are_isolated() {
        let queue = InMemoryQueue::new();
        let mut other = queue.connect("mem", "other").await.unwrap();
        queue.push("default", vec![1]);

        assert!(other.reserve(Duration::ZERO).await.unwrap().is_none());
        assert_eq!(queue.ready_count("default"), 1);
    }

    #[tokio::test]
    async fn test_injected_put_failures() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        queue.fail_puts_after(2);

        conn.put(b"1", &PutParams::default()).await.unwrap();
        conn.put(b"2", &PutParams::default()).await.unwrap();
        assert!(matches!(
            conn.put(b"3", &PutParams::default()).await,
            Err(QueueError::Injected(_))
        ));
        assert_eq!(queue.stats().puts, 2);

        queue.clear_faults();
        conn.put(b"4", &PutParams::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_delete_failure_keeps_reservation() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        queue.push("default", vec![1]);
        queue.fail_next_deletes(1);

        let job = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        assert!(conn.delete(job.id).await.is_err());
        assert_eq!(queue.reserved_count(), 1);

        conn.delete(job.id).await.unwrap();
        assert_eq!(queue.reserved_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_queue() {
        let queue = InMemoryQueue::new();
        let mut conn = connect(&queue).await;
        assert!(conn.is_healthy());

        queue.set_reachable(false);
        assert!(!conn.is_healthy());
        assert!(matches!(
            conn.put(b"x", &PutParams::default()).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.connect("mem", "default").await,
            Err(QueueError::Connect { .. })
        ));
    }
}
