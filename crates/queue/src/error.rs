//! Error type for queue operations

use crate::client::JobId;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Could not establish a connection
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on an established connection
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// A previous command was interrupted and the response stream is unusable
    #[error("connection out of sync after an interrupted command")]
    Desynced,

    /// No connection in the group is currently usable
    #[error("no healthy connection available")]
    NotConnected,

    /// Job is unknown or not reserved by this connection
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Server accepted the job but buried it
    #[error("job buried by server: {0}")]
    Buried(JobId),

    /// Server answered with an error keyword (OUT_OF_MEMORY, JOB_TOO_BIG, ...)
    #[error("server error: {0}")]
    Server(String),

    /// Response did not match the command
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Failure injected by a test queue
    #[error("injected failure: {0}")]
    Injected(String),
}

impl QueueError {
    /// Whether the connection that produced this error must be discarded
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::Desynced | Self::Protocol(_)
        )
    }
}
