//! Connection groups
//!
//! A group owns a fixed number of connection slots to one host. Each slot is
//! dialled by a background task that retries until it succeeds and redials
//! whenever the slot's connection breaks. Callers check out a slot for one or
//! more commands through a [`Lease`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{Job, JobId, PutParams, QueueConnection, QueueConnector};
use crate::error::QueueError;

/// Pause between failed dial attempts
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

type ConnectionSlot = Option<Box<dyn QueueConnection>>;

struct Slot {
    conn: Mutex<ConnectionSlot>,
    connected: AtomicBool,
    redial: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            redial: Notify::new(),
        }
    }
}

/// A fixed-size set of connections to one host
///
/// # Example
///
/// ```ignore
/// let group = ConnectionGroup::open(connector, "localhost:11300", "default", 4);
/// if !group.wait_healthy(Duration::from_secs(1)).await {
///     return Err(...);
/// }
///
/// let mut lease = group.checkout().await?;
/// if let Some(job) = lease.reserve(Duration::from_millis(250)).await? {
///     lease.delete(job.id).await?;
/// }
/// drop(lease);
///
/// group.close().await;
/// ```
pub struct ConnectionGroup {
    host: String,
    slots: Vec<Arc<Slot>>,
    live: Arc<watch::Sender<usize>>,
    next: AtomicUsize,
    shutdown: CancellationToken,
    dialers: parking_lot::Mutex<JoinSet<()>>,
}

impl ConnectionGroup {
    /// Open a group of `size` connections (at least one)
    ///
    /// Returns immediately; connections are established in the background.
    /// Must be called from within a tokio runtime.
    pub fn open(
        connector: Arc<dyn QueueConnector>,
        host: impl Into<String>,
        tube: impl Into<String>,
        size: usize,
    ) -> Self {
        let host = host.into();
        let tube = tube.into();
        let size = size.max(1);

        let (live, _) = watch::channel(0usize);
        let live = Arc::new(live);
        let shutdown = CancellationToken::new();
        let slots: Vec<Arc<Slot>> = (0..size).map(|_| Arc::new(Slot::new())).collect();

        let mut dialers = JoinSet::new();
        for (index, slot) in slots.iter().enumerate() {
            dialers.spawn(dial_loop(
                Arc::clone(&connector),
                host.clone(),
                tube.clone(),
                index,
                Arc::clone(slot),
                Arc::clone(&live),
                shutdown.clone(),
            ));
        }

        debug!(%host, %tube, size, "Opened connection group");

        Self {
            host,
            slots,
            live,
            next: AtomicUsize::new(0),
            shutdown,
            dialers: parking_lot::Mutex::new(dialers),
        }
    }

    /// Host this group dials
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots with an established connection
    pub fn live_connections(&self) -> usize {
        *self.live.borrow()
    }

    /// Whether at least one connection is established
    pub fn is_healthy(&self) -> bool {
        self.live_connections() > 0
    }

    /// Wait until the group is healthy, at most `timeout`
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn wait_healthy(&self, timeout: Duration) -> bool {
        let mut rx = self.live.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|live| *live > 0))
            .await
            .map(|changed| changed.is_ok());

        match waited {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!(?timeout, "Connection group did not become healthy");
                false
            }
        }
    }

    /// Check out a connected slot, round-robin
    ///
    /// Waits if the chosen slot is busy with another lease.
    pub async fn checkout(&self) -> Result<Lease<'_>, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::NotConnected);
        }

        let count = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);

        for offset in 0..count {
            let index = (start + offset) % count;
            let slot = &self.slots[index];
            if !slot.connected.load(Ordering::Acquire) {
                continue;
            }

            let mut guard = slot.conn.lock().await;
            match guard.as_ref() {
                Some(conn) if conn.is_healthy() => {
                    return Ok(Lease {
                        group: self,
                        index,
                        conn: guard,
                    });
                }
                Some(_) => {
                    guard.take();
                    self.slot_lost(index);
                }
                None => {}
            }
        }

        Err(QueueError::NotConnected)
    }

    /// Stop redialling and drop every connection
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.dialers.lock().abort_all();

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.conn.lock().await.take().is_some() {
                self.slot_lost(index);
            }
        }

        debug!(host = %self.host, "Closed connection group");
    }

    fn slot_lost(&self, index: usize) {
        let slot = &self.slots[index];
        if slot.connected.swap(false, Ordering::AcqRel) {
            self.live.send_modify(|live| *live = live.saturating_sub(1));
            slot.redial.notify_one();
        }
    }
}

impl Drop for ConnectionGroup {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dial_loop(
    connector: Arc<dyn QueueConnector>,
    host: String,
    tube: String,
    index: usize,
    slot: Arc<Slot>,
    live: Arc<watch::Sender<usize>>,
    shutdown: CancellationToken,
) {
    let mut attempts: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let dialled = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = connector.connect(&host, &tube) => result,
        };

        match dialled {
            Ok(conn) => {
                {
                    let mut guard = slot.conn.lock().await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    *guard = Some(conn);
                }
                slot.connected.store(true, Ordering::Release);
                live.send_modify(|live| *live += 1);
                if attempts > 0 {
                    info!(%host, slot = index, attempts, "Connection established after retries");
                } else {
                    debug!(%host, slot = index, "Connection established");
                }
                attempts = 0;

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = slot.redial.notified() => {
                        debug!(%host, slot = index, "Connection lost, redialling");
                    }
                }
            }
            Err(e) => {
                attempts += 1;
                debug!(%host, slot = index, attempts, error = %e, "Dial failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(DIAL_RETRY_INTERVAL) => {}
                }
            }
        }
    }

    debug!(%host, slot = index, "Dial loop exited");
}

/// Exclusive use of one connection in a group
///
/// A connection that fails with a connection-fatal error is removed from
/// its slot and redialled in the background.
pub struct Lease<'a> {
    group: &'a ConnectionGroup,
    index: usize,
    conn: MutexGuard<'a, ConnectionSlot>,
}

impl Lease<'_> {
    /// Slot index of the leased connection
    pub fn slot(&self) -> usize {
        self.index
    }

    pub async fn put(&mut self, body: &[u8], params: &PutParams) -> Result<JobId, QueueError> {
        let result = self.connection()?.put(body, params).await;
        self.settle(result)
    }

    pub async fn reserve(&mut self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let result = self.connection()?.reserve(timeout).await;
        self.settle(result)
    }

    pub async fn delete(&mut self, id: JobId) -> Result<(), QueueError> {
        let result = self.connection()?.delete(id).await;
        self.settle(result)
    }

    pub async fn release(&mut self, id: JobId, priority: u32) -> Result<(), QueueError> {
        let result = self.connection()?.release(id, priority).await;
        self.settle(result)
    }

    fn connection(&mut self) -> Result<&mut Box<dyn QueueConnection>, QueueError> {
        self.conn.as_mut().ok_or(QueueError::NotConnected)
    }

    fn settle<T>(&mut self, result: Result<T, QueueError>) -> Result<T, QueueError> {
        let fatal = matches!(&result, Err(e) if e.is_connection_fatal());
        let unhealthy = self.conn.as_ref().is_some_and(|conn| !conn.is_healthy());

        if fatal || unhealthy {
            if let Err(e) = &result {
                warn!(host = %self.group.host, slot = self.index, error = %e, "Dropping broken connection");
            }
            self.conn.take();
            self.group.slot_lost(self.index);
        }

        result
    }
}
