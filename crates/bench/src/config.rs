//! Run configuration and policy constants

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a freshly opened connection group may take to report healthy
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

/// Time-to-run given to every submitted job
pub const DEFAULT_TTR: Duration = Duration::from_secs(120);

/// Window of a single reservation attempt; an empty window is retried
pub const RESERVE_TIMEOUT: Duration = Duration::from_millis(250);

/// Pause after a failed reservation before the worker tries again
pub const RESERVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Reservation workers per reader connection
pub const READER_FANOUT: usize = 10;

/// Default bound on in-flight submissions per publisher connection
pub const IN_FLIGHT_PER_CONNECTION: usize = 64;

/// Address of a beanstalkd on its standard port
pub const DEFAULT_HOST: &str = "localhost:11300";

pub use beanbench_queue::beanstalk::DEFAULT_TUBE;

/// Configuration of one benchmark run
///
/// Built once before the run and never modified while it executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Queue server address (`host:port`)
    pub host: String,

    /// Publisher connections (0 disables publishing)
    pub publishers: usize,

    /// Reader connections (0 disables reading)
    pub readers: usize,

    /// Jobs each enabled role must process
    pub job_count: u64,

    /// Job body size in bytes
    pub payload_size: usize,

    /// Empty the tube before the run
    pub drain: bool,

    /// Jobs to put before the timed window starts
    pub prefill: u64,

    /// Tube jobs are put on and reserved from
    pub tube: String,

    /// Bound on concurrent submissions; `None` derives it from `publishers`
    pub max_in_flight: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            publishers: 1,
            readers: 1,
            job_count: 10_000,
            payload_size: 256,
            drain: false,
            prefill: 0,
            tube: DEFAULT_TUBE.to_string(),
            max_in_flight: None,
        }
    }
}

impl RunConfig {
    /// Create a configuration targeting `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_publishers(mut self, publishers: usize) -> Self {
        self.publishers = publishers;
        self
    }

    pub fn with_readers(mut self, readers: usize) -> Self {
        self.readers = readers;
        self
    }

    pub fn with_job_count(mut self, job_count: u64) -> Self {
        self.job_count = job_count;
        self
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_drain(mut self, drain: bool) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_prefill(mut self, prefill: u64) -> Self {
        self.prefill = prefill;
        self
    }

    pub fn with_tube(mut self, tube: impl Into<String>) -> Self {
        self.tube = tube.into();
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight.max(1));
        self
    }

    /// Publisher pool settings for the timed run
    pub fn publisher_config(&self) -> PublisherConfig {
        let config = PublisherConfig::new(
            self.host.clone(),
            self.publishers,
            self.job_count,
            self.payload_size,
        )
        .with_tube(self.tube.clone());

        match self.max_in_flight {
            Some(max) => config.with_max_in_flight(max),
            None => config,
        }
    }

    /// Publisher pool settings for the prefill pass (single connection)
    pub fn prefill_config(&self) -> PublisherConfig {
        PublisherConfig::new(self.host.clone(), 1, self.prefill, self.payload_size)
            .with_tube(self.tube.clone())
    }

    /// Consumer pool settings for the timed run
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.host.clone(), self.readers, self.job_count)
            .with_tube(self.tube.clone())
    }
}

/// Settings of one publisher pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub host: String,
    pub tube: String,
    /// Connections in the pool's group
    pub concurrency: usize,
    pub job_count: u64,
    pub payload_size: usize,
    pub ttr: Duration,
    pub health_timeout: Duration,
    /// Submission workers running at once
    pub max_in_flight: usize,
}

impl PublisherConfig {
    pub fn new(
        host: impl Into<String>,
        concurrency: usize,
        job_count: u64,
        payload_size: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            host: host.into(),
            tube: DEFAULT_TUBE.to_string(),
            concurrency,
            job_count,
            payload_size,
            ttr: DEFAULT_TTR,
            health_timeout: HEALTH_TIMEOUT,
            max_in_flight: concurrency * IN_FLIGHT_PER_CONNECTION,
        }
    }

    pub fn with_tube(mut self, tube: impl Into<String>) -> Self {
        self.tube = tube.into();
        self
    }

    pub fn with_ttr(mut self, ttr: Duration) -> Self {
        self.ttr = ttr;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Workers actually spawned: never more than there are jobs
    pub fn worker_count(&self) -> usize {
        let jobs = usize::try_from(self.job_count).unwrap_or(usize::MAX);
        self.max_in_flight.min(jobs)
    }
}

/// Settings of one consumer pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub host: String,
    pub tube: String,
    /// Connections in the pool's group
    pub concurrency: usize,
    pub job_count: u64,
    /// Reservation workers sharing the group
    pub workers: usize,
    pub reserve_timeout: Duration,
    pub health_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(host: impl Into<String>, concurrency: usize, job_count: u64) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            host: host.into(),
            tube: DEFAULT_TUBE.to_string(),
            concurrency,
            job_count,
            workers: concurrency * READER_FANOUT,
            reserve_timeout: RESERVE_TIMEOUT,
            health_timeout: HEALTH_TIMEOUT,
        }
    }

    pub fn with_tube(mut self, tube: impl Into<String>) -> Self {
        self.tube = tube.into();
        self
    }

    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}
