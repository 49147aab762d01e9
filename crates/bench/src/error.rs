//! Error type for benchmark runs

use std::time::Duration;

use beanbench_queue::QueueError;

use crate::metrics::Role;

/// Error type for benchmark runs
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Connection group did not report healthy within the startup bound
    #[error("queue at {host} not healthy after {waited:?}")]
    NotHealthy { host: String, waited: Duration },

    /// A job could not be submitted
    #[error("failed to enqueue job: {0}")]
    Enqueue(#[source] QueueError),

    /// Drain or prefill failed before the timed run
    #[error("setup failed: {0}")]
    Setup(#[source] QueueError),

    /// Pool was cancelled before reaching its target
    #[error("{role} pool cancelled after {completed} of {target} jobs")]
    Cancelled {
        role: Role,
        completed: u64,
        target: u64,
    },

    /// Pool task ended without reporting an outcome
    #[error("{0} pool exited without signalling completion")]
    PoolVanished(Role),

    /// A worker task panicked
    #[error("{role} worker failed: {message}")]
    Worker { role: Role, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BenchError::NotHealthy {
            host: "localhost:11300".into(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "queue at localhost:11300 not healthy after 1s");

        let err = BenchError::Cancelled {
            role: Role::Reader,
            completed: 3,
            target: 10,
        };
        assert_eq!(err.to_string(), "reader pool cancelled after 3 of 10 jobs");

        let err = BenchError::PoolVanished(Role::Publisher);
        assert_eq!(
            err.to_string(),
            "publisher pool exited without signalling completion"
        );
    }

    #[test]
    fn test_queue_error_is_source() {
        use std::error::Error;

        let err = BenchError::Enqueue(QueueError::Closed);
        assert_eq!(err.to_string(), "failed to enqueue job: connection closed by peer");
        assert!(err.source().is_some());
    }
}
