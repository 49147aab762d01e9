//! # Job-queue benchmark harness
//!
//! Drives concurrent producers and consumers against a live job queue and
//! reports how long each role took to move a fixed number of jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BenchmarkDriver                          │
//! │  (drain/prefill, shared start instant, per-role metrics)     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │      PublisherPool        │   │       ConsumerPool        │
//! │  (bounded put workers)    │   │  (reserve/delete workers, │
//! │                           │   │   cancelled at target)    │
//! └───────────────────────────┘   └───────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        OperationCounter  +  CompletionSignal (one-shot)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beanbench::prelude::*;
//! use beanbench_queue::BeanstalkConnector;
//!
//! let config = RunConfig::new("localhost:11300")
//!     .with_publishers(4)
//!     .with_readers(4)
//!     .with_job_count(100_000);
//!
//! let driver = BenchmarkDriver::new(Arc::new(BeanstalkConnector::new()), config);
//! let summary = driver.execute().await?;
//! ```

pub mod config;
pub mod consumer;
pub mod counter;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod setup;
pub mod signal;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConsumerConfig, PublisherConfig, RunConfig};
    pub use crate::consumer::ConsumerPool;
    pub use crate::counter::OperationCounter;
    pub use crate::driver::{BenchmarkDriver, RunSummary};
    pub use crate::error::BenchError;
    pub use crate::metrics::{
        LatencyHistogram, LatencySummary, PoolReport, Role, RoleReport, RunMetrics,
    };
    pub use crate::publisher::PublisherPool;
    pub use crate::setup::DrainReport;
    pub use crate::signal::{completion, Completer, CompletionSignal};
}

// Re-export key types at crate root
pub use config::{ConsumerConfig, PublisherConfig, RunConfig};
pub use consumer::ConsumerPool;
pub use counter::OperationCounter;
pub use driver::{BenchmarkDriver, RunSummary};
pub use error::BenchError;
pub use metrics::{LatencyHistogram, LatencySummary, PoolReport, Role, RoleReport, RunMetrics};
pub use publisher::PublisherPool;
pub use setup::DrainReport;
pub use signal::{completion, Completer, CompletionSignal};
