//! Metrics collection
//!
//! Concurrent counter and timing aggregation keyed by dotted names
//! (`job.success`, `pipeline.run`, ...). All writes go through one mutex;
//! reads return snapshots and never block submitters beyond it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Aggregated timing for one name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Number of recorded samples
    pub count: u64,
    /// Sum of all samples
    pub total: Duration,
    /// Largest sample
    pub max: Duration,
}

impl TimingStats {
    fn record(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.max = self.max.max(sample);
    }
}

/// Point-in-time view of every counter and timing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values by name
    pub counters: HashMap<String, u64>,
    /// Timing aggregates by name
    pub timings: HashMap<String, TimingStats>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, u64>,
    timings: HashMap<String, TimingStats>,
}

/// Concurrent metrics registry
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    /// Increments a counter by `n`.
    pub fn incr_by(&self, name: &str, n: u64) {
        let mut inner = self.inner.lock();
        *inner.counters.entry(name.to_string()).or_default() += n;
    }

    /// Records one timing sample.
    pub fn record_timing(&self, name: &str, sample: Duration) {
        let mut inner = self.inner.lock();
        inner.timings.entry(name.to_string()).or_default().record(sample);
    }

    /// Starts a timer that records into `name` when dropped.
    #[must_use]
    pub fn timer(&self, name: &str) -> Timer<'_> {
        Timer {
            registry: self,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Current value of a counter; zero when never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Timing aggregate for a name.
    #[must_use]
    pub fn timing(&self, name: &str) -> Option<TimingStats> {
        self.inner.lock().timings.get(name).copied()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            counters: inner.counters.clone(),
            timings: inner.timings.clone(),
        }
    }
}

/// Guard recording the elapsed time on drop
#[derive(Debug)]
pub struct Timer<'a> {
    registry: &'a MetricsRegistry,
    name: String,
    started: Instant,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.registry.record_timing(&self.name, self.started.elapsed());
    }
}
