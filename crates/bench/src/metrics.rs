//! Metrics collection for benchmark runs
//!
//! Per-operation latency distributions and per-role throughput. Latency
//! buckets are fixed-size so a run's memory does not scale with its job count.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side of the queue a pool drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Publisher,
    Reader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publisher => write!(f, "publisher"),
            Self::Reader => write!(f, "reader"),
        }
    }
}

/// Exact buckets below this many microseconds
const LINEAR_LIMIT: u64 = 64;

/// Sub-buckets per power of two above the linear range (~3% resolution)
const SUB_BUCKETS: u64 = 32;

/// Enough buckets to cover every `u64` microsecond value
const BUCKET_COUNT: usize = (LINEAR_LIMIT + (64 - 6) * SUB_BUCKETS) as usize;

/// Histogram for latency measurements
///
/// Samples land in fixed log-linear buckets, so memory stays constant no
/// matter how many jobs a run moves. Min, max and mean are exact;
/// percentiles are exact below 64µs and within ~3% above.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Box<[AtomicU64]>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    /// Record a latency sample
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        self.buckets[bucket_index(micros)].fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_micros.load(Ordering::Relaxed) / count)
    }

    pub fn min(&self) -> Duration {
        match self.min_micros.load(Ordering::Relaxed) {
            u64::MAX => Duration::ZERO,
            min => Duration::from_micros(min),
        }
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_micros.load(Ordering::Relaxed))
    }

    /// Calculate percentile (0.0 to 1.0)
    pub fn percentile(&self, p: f64) -> Duration {
        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .collect();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let rank = ((total as f64 * p) as u64).min(total - 1);
        let mut seen = 0u64;
        for (index, count) in counts.iter().enumerate() {
            seen += count;
            if seen > rank {
                let micros = bucket_floor(index).clamp(
                    self.min_micros.load(Ordering::Relaxed),
                    self.max_micros.load(Ordering::Relaxed),
                );
                return Duration::from_micros(micros);
            }
        }
        self.max()
    }

    /// Get summary statistics
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean: self.mean(),
            min: self.min(),
            max: self.max(),
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

fn bucket_index(micros: u64) -> usize {
    if micros < LINEAR_LIMIT {
        return micros as usize;
    }
    let exponent = 63 - u64::from(micros.leading_zeros());
    let mantissa = micros >> (exponent - 5);
    (LINEAR_LIMIT + (exponent - 6) * SUB_BUCKETS + (mantissa - SUB_BUCKETS)) as usize
}

/// Smallest value that lands in bucket `index`
fn bucket_floor(index: usize) -> u64 {
    let index = index as u64;
    if index < LINEAR_LIMIT {
        return index;
    }
    let offset = index - LINEAR_LIMIT;
    let exponent = 6 + offset / SUB_BUCKETS;
    let mantissa = SUB_BUCKETS + offset % SUB_BUCKETS;
    mantissa << (exponent - 5)
}

/// Summary statistics for latency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    #[serde(with = "duration_millis")]
    pub mean: Duration,
    #[serde(with = "duration_millis")]
    pub min: Duration,
    #[serde(with = "duration_millis")]
    pub max: Duration,
    #[serde(with = "duration_millis")]
    pub p50: Duration,
    #[serde(with = "duration_millis")]
    pub p95: Duration,
    #[serde(with = "duration_millis")]
    pub p99: Duration,
}

/// Outcome of one pool run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    /// Jobs put (publisher) or deleted (reader)
    pub completed: u64,
    /// Deletes the server rejected
    pub ack_failures: u64,
    /// Jobs reserved past the target and handed back
    pub released: u64,
    /// Reservation attempts that failed with an error
    pub reserve_errors: u64,
    /// Put latency (publisher) or reserve-to-delete latency (reader)
    pub latency: LatencySummary,
}

impl PoolReport {
    /// Report of a pool that had nothing to do
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Throughput of one role over the timed window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunMetrics {
    pub count: u64,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Jobs per second
    pub rate: f64,
}

impl RunMetrics {
    pub fn new(count: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs == 0.0 { 0.0 } else { count as f64 / secs };
        Self {
            count,
            elapsed,
            rate,
        }
    }
}

/// Everything reported for one role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleReport {
    pub role: Role,
    pub metrics: RunMetrics,
    pub pool: PoolReport,
}

/// Durations as fractional milliseconds
mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }
}
