//! Sliding per-second windows.
//!
//! Both structures bucket observations by epoch second and drop buckets that
//! fall out of the window on every access. Callers pass the current epoch
//! second explicitly, which keeps window behavior deterministic under test.

use std::collections::BTreeMap;
use std::time::Duration;

/// Individual samples bucketed per second over a sliding window.
#[derive(Debug)]
pub struct RollingSample {
    window_secs: u64,
    buckets: BTreeMap<u64, Vec<f64>>,
}

impl RollingSample {
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs().max(1),
            buckets: BTreeMap::new(),
        }
    }

    /// Record a sample at the given epoch second.
    pub fn record(&mut self, now_secs: u64, value: f64) {
        self.prune(now_secs);
        self.buckets.entry(now_secs).or_default().push(value);
    }

    fn prune(&mut self, now_secs: u64) {
        let cutoff = now_secs.saturating_sub(self.window_secs - 1);
        self.buckets = self.buckets.split_off(&cutoff);
    }

    /// Number of samples currently inside the window.
    pub fn len(&mut self, now_secs: u64) -> usize {
        self.prune(now_secs);
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&mut self, now_secs: u64) -> bool {
        self.len(now_secs) == 0
    }

    /// Nearest-rank percentile over the samples in the window, or zero when
    /// the window is empty. `p` is in percent, e.g. `99.5`.
    pub fn percentile(&mut self, p: f64, now_secs: u64) -> f64 {
        self.prune(now_secs);
        let mut values: Vec<f64> = self.buckets.values().flatten().copied().collect();
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((p / 100.0) * values.len() as f64).ceil() as usize;
        let index = rank.clamp(1, values.len()) - 1;
        values[index]
    }

    pub fn mean(&mut self, now_secs: u64) -> f64 {
        self.prune(now_secs);
        let mut count = 0usize;
        let mut sum = 0.0;
        for values in self.buckets.values() {
            count += values.len();
            sum += values.iter().sum::<f64>();
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Per-second averages inside the window, oldest bucket first. Seconds
    /// with no samples are absent rather than zero-filled.
    pub fn second_averages(&mut self, now_secs: u64) -> Vec<f64> {
        self.prune(now_secs);
        self.buckets
            .values()
            .map(|values| values.iter().sum::<f64>() / values.len() as f64)
            .collect()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

/// Event counts bucketed per second over a sliding window.
#[derive(Debug)]
pub struct RollingCounter {
    window_secs: u64,
    buckets: BTreeMap<u64, u64>,
}

impl RollingCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs().max(1),
            buckets: BTreeMap::new(),
        }
    }

    pub fn increment(&mut self, now_secs: u64) {
        self.prune(now_secs);
        *self.buckets.entry(now_secs).or_insert(0) += 1;
    }

    fn prune(&mut self, now_secs: u64) {
        let cutoff = now_secs.saturating_sub(self.window_secs - 1);
        self.buckets = self.buckets.split_off(&cutoff);
    }

    /// Total events inside the window.
    pub fn sum(&mut self, now_secs: u64) -> u64 {
        self.prune(now_secs);
        self.buckets.values().sum()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
