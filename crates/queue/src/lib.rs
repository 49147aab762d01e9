//! # Queue client seam
//!
//! Everything the benchmark core needs from a job queue, behind two traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConnectionGroup                          │
//! │  (N slots, background redial, round-robin checkout)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            QueueConnector / QueueConnection                  │
//! │  (put, reserve, delete, release, health)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │      InMemoryQueue        │   │    BeanstalkConnector     │
//! │  (tests, fault injection) │   │  (TCP, beanstalkd text)   │
//! └───────────────────────────┘   └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beanbench_queue::prelude::*;
//!
//! let connector: Arc<dyn QueueConnector> = Arc::new(BeanstalkConnector::new());
//! let group = ConnectionGroup::open(connector, "localhost:11300", "default", 4);
//!
//! if group.wait_healthy(Duration::from_secs(1)).await {
//!     let mut lease = group.checkout().await?;
//!     let id = lease.put(&[0u8; 256], &PutParams::default()).await?;
//! }
//! group.close().await;
//! ```

pub mod beanstalk;
pub mod client;
pub mod error;
pub mod group;
pub mod memory;

/// Prelude for common imports
pub mod prelude {
    pub use crate::beanstalk::BeanstalkConnector;
    pub use crate::client::{Job, JobId, PutParams, QueueConnection, QueueConnector};
    pub use crate::error::QueueError;
    pub use crate::group::{ConnectionGroup, Lease};
    pub use crate::memory::{InMemoryQueue, QueueStats};
}

// Re-export key types at crate root
pub use beanstalk::BeanstalkConnector;
pub use client::{Job, JobId, PutParams, QueueConnection, QueueConnector, DEFAULT_PRIORITY};
pub use error::QueueError;
pub use group::{ConnectionGroup, Lease};
pub use memory::{InMemoryQueue, QueueStats};
