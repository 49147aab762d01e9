//! QueueConnector / QueueConnection trait definitions

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

/// Server-assigned job identifier
pub type JobId = u64;

/// Priority used when none is given (beanstalkd convention, lower is more urgent)
pub const DEFAULT_PRIORITY: u32 = 1024;

/// Parameters for a single put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutParams {
    /// Job priority
    pub priority: u32,

    /// Delay before the job becomes ready
    pub delay: Duration,

    /// Time-to-run: how long a reservation may stay unacknowledged
    /// before the server hands the job out again
    pub ttr: Duration,
}

impl Default for PutParams {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay: Duration::ZERO,
            ttr: Duration::from_secs(120),
        }
    }
}

impl PutParams {
    /// Set the priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the time-to-run (at least one second, the server's granularity)
    pub fn with_ttr(mut self, ttr: Duration) -> Self {
        self.ttr = ttr.max(Duration::from_secs(1));
        self
    }
}

/// A job reserved by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub body: Vec<u8>,
}

/// A single connection to the queue service
///
/// Commands on one connection are serialized; a reservation must be
/// deleted or released on the connection that made it.
#[async_trait]
pub trait QueueConnection: Send {
    /// Enqueue a job on the connection's tube
    async fn put(&mut self, body: &[u8], params: &PutParams) -> Result<JobId, QueueError>;

    /// Reserve the next ready job, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no job became available in the window.
    async fn reserve(&mut self, timeout: Duration) -> Result<Option<Job>, QueueError>;

    /// Delete (acknowledge) a job reserved by this connection
    async fn delete(&mut self, id: JobId) -> Result<(), QueueError>;

    /// Put a reserved job back into the ready queue
    async fn release(&mut self, id: JobId, priority: u32) -> Result<(), QueueError>;

    /// Whether the connection is still usable
    fn is_healthy(&self) -> bool;
}

/// Opens connections to a queue service
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Dial `host`, using and watching `tube`
    async fn connect(&self, host: &str, tube: &str)
        -> Result<Box<dyn QueueConnection>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_put_params() {
        let params = PutParams::default();
        assert_eq!(params.priority, DEFAULT_PRIORITY);
        assert_eq!(params.delay, Duration::ZERO);
        assert_eq!(params.ttr, Duration::from_secs(120));
    }

    #[test]
    fn test_put_params_builder() {
        let params = PutParams::default()
            .with_priority(1)
            .with_delay(Duration::from_secs(2))
            .with_ttr(Duration::from_millis(10));

        assert_eq!(params.priority, 1);
        assert_eq!(params.delay, Duration::from_secs(2));
        // Clamped to the one-second minimum
        assert_eq!(params.ttr, Duration::from_secs(1));
    }
}
