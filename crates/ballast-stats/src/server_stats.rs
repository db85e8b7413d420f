//! Per-server request accounting and circuit-breaker state.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use ballast_core::Server;

use crate::distribution::Distribution;
use crate::rolling::{RollingCounter, RollingSample};

/// Successive tripping failures before the circuit opens.
pub const DEFAULT_CONNECTION_FAILURE_THRESHOLD: u32 = 5;
/// Linear factor applied to the blackout window.
pub const DEFAULT_CIRCUIT_TRIPPED_TIMEOUT_FACTOR: u32 = 10;
/// Upper bound on a single blackout window.
pub const DEFAULT_MAX_CIRCUIT_TRIPPED_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the active-request gauge may sit unchanged before it is
/// considered stale and reset.
const ACTIVE_REQUESTS_STALENESS: Duration = Duration::from_secs(30);
/// Width of the rolling per-second windows.
const SAMPLE_WINDOW: Duration = Duration::from_secs(300);

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Request accounting and circuit-breaker state for one server.
///
/// Counters are atomics and the heavier series sit behind short-lived
/// mutexes, so concurrent attempts never serialize on each other for long.
/// Every time-dependent accessor has an `_at` variant taking an explicit
/// epoch-millisecond clock; the plain variants read the wall clock.
#[derive(Debug)]
pub struct ServerStats {
    server: Arc<Server>,

    connection_failure_threshold: u32,
    circuit_tripped_timeout_factor: u32,
    max_circuit_tripped_timeout: Duration,

    total_requests: AtomicU64,
    active_requests: AtomicI64,
    open_connections: AtomicI64,
    successive_connection_failures: AtomicU32,

    last_connection_failure_ms: AtomicU64,
    last_active_change_ms: AtomicU64,
    first_connection_ms: AtomicU64,
    last_access_ms: AtomicU64,

    response_times: Mutex<Distribution>,
    window_response_times: Mutex<RollingSample>,
    window_failures: Mutex<RollingCounter>,
    window_requests: Mutex<RollingCounter>,
}

impl ServerStats {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            connection_failure_threshold: DEFAULT_CONNECTION_FAILURE_THRESHOLD,
            circuit_tripped_timeout_factor: DEFAULT_CIRCUIT_TRIPPED_TIMEOUT_FACTOR,
            max_circuit_tripped_timeout: DEFAULT_MAX_CIRCUIT_TRIPPED_TIMEOUT,
            total_requests: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            open_connections: AtomicI64::new(0),
            successive_connection_failures: AtomicU32::new(0),
            last_connection_failure_ms: AtomicU64::new(0),
            last_active_change_ms: AtomicU64::new(0),
            first_connection_ms: AtomicU64::new(0),
            last_access_ms: AtomicU64::new(0),
            response_times: Mutex::new(Distribution::new()),
            window_response_times: Mutex::new(RollingSample::new(SAMPLE_WINDOW)),
            window_failures: Mutex::new(RollingCounter::new(SAMPLE_WINDOW)),
            window_requests: Mutex::new(RollingCounter::new(SAMPLE_WINDOW)),
        }
    }

    /// Override the circuit-breaker parameters, normally from client config.
    pub fn with_breaker(
        mut self,
        failure_threshold: u32,
        tripped_timeout_factor: u32,
        max_tripped_timeout: Duration,
    ) -> Self {
        self.connection_failure_threshold = failure_threshold;
        self.circuit_tripped_timeout_factor = tripped_timeout_factor;
        self.max_circuit_tripped_timeout = max_tripped_timeout;
        self
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    // ── Request accounting ──────────────────────────────────────────────

    pub fn increment_num_requests(&self) {
        self.increment_num_requests_at(epoch_millis());
    }

    pub fn increment_num_requests_at(&self, now_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.last_access_ms.store(now_ms, Ordering::Relaxed);
        self.window_requests
            .lock()
            .expect("stats lock")
            .increment(now_ms / 1000);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests inside the rolling window.
    pub fn measured_request_count(&self) -> u64 {
        self.measured_request_count_at(epoch_millis())
    }

    pub fn measured_request_count_at(&self, now_ms: u64) -> u64 {
        self.window_requests
            .lock()
            .expect("stats lock")
            .sum(now_ms / 1000)
    }

    pub fn increment_active_requests(&self) {
        self.increment_active_requests_at(epoch_millis());
    }

    pub fn increment_active_requests_at(&self, now_ms: u64) {
        let _ = self.first_connection_ms.compare_exchange(
            0,
            now_ms,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.last_active_change_ms.store(now_ms, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_requests(&self) {
        self.decrement_active_requests_at(epoch_millis());
    }

    pub fn decrement_active_requests_at(&self, now_ms: u64) {
        self.last_active_change_ms.store(now_ms, Ordering::Relaxed);
        if self.active_requests.fetch_sub(1, Ordering::Relaxed) <= 0 {
            self.active_requests.store(0, Ordering::Relaxed);
        }
    }

    /// Current in-flight request gauge. A gauge that has not moved for the
    /// staleness window is assumed leaked and reads as zero.
    pub fn active_requests(&self) -> i64 {
        self.active_requests_at(epoch_millis())
    }

    pub fn active_requests_at(&self, now_ms: u64) -> i64 {
        let count = self.active_requests.load(Ordering::Relaxed);
        if count <= 0 {
            return 0;
        }
        let last_change = self.last_active_change_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last_change) > ACTIVE_REQUESTS_STALENESS.as_millis() as u64 {
            debug!(server = %self.server, stale = count, "resetting stale active-request gauge");
            self.active_requests.store(0, Ordering::Relaxed);
            return 0;
        }
        count
    }

    pub fn increment_open_connections(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_open_connections(&self) {
        if self.open_connections.fetch_sub(1, Ordering::Relaxed) <= 0 {
            self.open_connections.store(0, Ordering::Relaxed);
        }
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed).max(0)
    }

    // ── Failures and the circuit breaker ────────────────────────────────

    pub fn increment_successive_connection_failures(&self) {
        self.increment_successive_connection_failures_at(epoch_millis());
    }

    pub fn increment_successive_connection_failures_at(&self, now_ms: u64) {
        self.successive_connection_failures
            .fetch_add(1, Ordering::Relaxed);
        self.last_connection_failure_ms
            .store(now_ms, Ordering::Relaxed);
    }

    pub fn clear_successive_connection_failures(&self) {
        self.successive_connection_failures
            .store(0, Ordering::Relaxed);
    }

    pub fn successive_connection_failures(&self) -> u32 {
        self.successive_connection_failures.load(Ordering::Relaxed)
    }

    pub fn last_connection_failure_ms(&self) -> u64 {
        self.last_connection_failure_ms.load(Ordering::Relaxed)
    }

    /// Record one failure in the rolling failure window.
    pub fn add_to_failure_count(&self) {
        self.add_to_failure_count_at(epoch_millis());
    }

    pub fn add_to_failure_count_at(&self, now_ms: u64) {
        self.window_failures
            .lock()
            .expect("stats lock")
            .increment(now_ms / 1000);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count_at(epoch_millis())
    }

    pub fn failure_count_at(&self, now_ms: u64) -> u64 {
        self.window_failures
            .lock()
            .expect("stats lock")
            .sum(now_ms / 1000)
    }

    /// Blackout window implied by the current successive-failure count.
    ///
    /// Zero below the threshold. At or above it, the window grows linearly
    /// with the overshoot (floored at one step, capped at sixteen) times the
    /// configured factor times two seconds, and is clamped to the maximum.
    fn circuit_breaker_blackout(&self) -> Duration {
        let failures = self.successive_connection_failures.load(Ordering::Relaxed);
        if failures < self.connection_failure_threshold {
            return Duration::ZERO;
        }
        let steps = (failures - self.connection_failure_threshold).clamp(1, 16) as u64;
        let blackout =
            Duration::from_secs(2 * self.circuit_tripped_timeout_factor as u64 * steps);
        blackout.min(self.max_circuit_tripped_timeout)
    }

    /// Whether the breaker currently blacks this server out.
    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.is_circuit_breaker_tripped_at(epoch_millis())
    }

    pub fn is_circuit_breaker_tripped_at(&self, now_ms: u64) -> bool {
        let blackout = self.circuit_breaker_blackout();
        if blackout.is_zero() {
            return false;
        }
        let last_failure = self.last_connection_failure_ms.load(Ordering::Relaxed);
        now_ms < last_failure + blackout.as_millis() as u64
    }

    // ── Response times ──────────────────────────────────────────────────

    pub fn note_response_time(&self, millis: f64) {
        self.note_response_time_at(millis, epoch_millis());
    }

    pub fn note_response_time_at(&self, millis: f64, now_ms: u64) {
        self.response_times
            .lock()
            .expect("stats lock")
            .add_value(millis);
        self.window_response_times
            .lock()
            .expect("stats lock")
            .record(now_ms / 1000, millis);
    }

    /// Lifetime mean response time in milliseconds.
    pub fn response_time_mean(&self) -> f64 {
        self.response_times.lock().expect("stats lock").mean()
    }

    pub fn response_time_min(&self) -> f64 {
        self.response_times.lock().expect("stats lock").minimum()
    }

    pub fn response_time_max(&self) -> f64 {
        self.response_times.lock().expect("stats lock").maximum()
    }

    pub fn response_time_std_dev(&self) -> f64 {
        self.response_times.lock().expect("stats lock").std_dev()
    }

    /// Nearest-rank percentile over the rolling window.
    pub fn response_time_percentile(&self, p: f64) -> f64 {
        self.response_time_percentile_at(p, epoch_millis())
    }

    pub fn response_time_percentile_at(&self, p: f64, now_ms: u64) -> f64 {
        self.window_response_times
            .lock()
            .expect("stats lock")
            .percentile(p, now_ms / 1000)
    }

    /// Per-second response-time averages inside the window, oldest first.
    pub fn window_response_time_averages(&self) -> Vec<f64> {
        self.window_response_time_averages_at(epoch_millis())
    }

    pub fn window_response_time_averages_at(&self, now_ms: u64) -> Vec<f64> {
        self.window_response_times
            .lock()
            .expect("stats lock")
            .second_averages(now_ms / 1000)
    }
}

impl fmt::Display for ServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: total={}, active={}, successive-failures={}, mean-rt={:.1}ms",
            self.server,
            self.total_requests(),
            self.active_requests.load(Ordering::Relaxed).max(0),
            self.successive_connection_failures(),
            self.response_time_mean(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stats() -> ServerStats {
        let server = Arc::new(Server::new("http", "127.0.0.1", 8080));
        ServerStats::new(server).with_breaker(3, 10, Duration::from_secs(30))
    }

    #[test]
    fn breaker_stays_closed_below_threshold() {
        let stats = test_stats();
        let now = 1_000_000;
        stats.increment_successive_connection_failures_at(now);
        stats.increment_successive_connection_failures_at(now);
        assert!(!stats.is_circuit_breaker_tripped_at(now));
    }

    #[test]
    fn breaker_trips_at_exactly_the_threshold() {
        let stats = test_stats();
        let now = 1_000_000;
        for _ in 0..3 {
            stats.increment_successive_connection_failures_at(now);
        }
        // factor 10, one step: 2 * 10 * 1 = 20s blackout.
        assert!(stats.is_circuit_breaker_tripped_at(now));
        assert!(stats.is_circuit_breaker_tripped_at(now + 19_999));
        assert!(!stats.is_circuit_breaker_tripped_at(now + 20_000));
    }

    #[test]
    fn blackout_grows_with_overshoot() {
        let server = Arc::new(Server::new("http", "a", 80));
        let stats = ServerStats::new(server).with_breaker(1, 1, Duration::from_secs(300));
        let now = 5_000_000;

        stats.increment_successive_connection_failures_at(now);
        // One failure at threshold 1: 2 * 1 * 1 = 2s.
        assert!(stats.is_circuit_breaker_tripped_at(now + 1_999));
        assert!(!stats.is_circuit_breaker_tripped_at(now + 2_000));

        stats.increment_successive_connection_failures_at(now);
        stats.increment_successive_connection_failures_at(now);
        // Three failures, overshoot 2: 2 * 1 * 2 = 4s.
        assert!(stats.is_circuit_breaker_tripped_at(now + 3_999));
        assert!(!stats.is_circuit_breaker_tripped_at(now + 4_000));
    }

    #[test]
    fn blackout_is_capped_by_max_timeout() {
        let server = Arc::new(Server::new("http", "a", 80));
        let stats = ServerStats::new(server).with_breaker(1, 10, Duration::from_secs(5));
        let now = 5_000_000;
        for _ in 0..10 {
            stats.increment_successive_connection_failures_at(now);
        }
        assert!(stats.is_circuit_breaker_tripped_at(now + 4_999));
        assert!(!stats.is_circuit_breaker_tripped_at(now + 5_000));
    }

    #[test]
    fn clearing_failures_closes_the_breaker() {
        let stats = test_stats();
        let now = 1_000_000;
        for _ in 0..5 {
            stats.increment_successive_connection_failures_at(now);
        }
        assert!(stats.is_circuit_breaker_tripped_at(now));
        stats.clear_successive_connection_failures();
        assert!(!stats.is_circuit_breaker_tripped_at(now));
    }

    #[test]
    fn active_request_gauge_tracks_and_clamps() {
        let stats = test_stats();
        let now = 1_000_000;
        stats.increment_active_requests_at(now);
        stats.increment_active_requests_at(now);
        assert_eq!(stats.active_requests_at(now + 10), 2);

        stats.decrement_active_requests_at(now + 20);
        stats.decrement_active_requests_at(now + 20);
        stats.decrement_active_requests_at(now + 20);
        assert_eq!(stats.active_requests_at(now + 30), 0);
    }

    #[test]
    fn stale_active_request_gauge_resets_to_zero() {
        let stats = test_stats();
        let now = 1_000_000;
        stats.increment_active_requests_at(now);
        assert_eq!(stats.active_requests_at(now + 29_000), 1);
        assert_eq!(stats.active_requests_at(now + 31_000), 0);
        // The reset sticks.
        assert_eq!(stats.active_requests_at(now + 31_001), 0);
    }

    #[test]
    fn open_connection_gauge_never_goes_negative() {
        let stats = test_stats();
        stats.decrement_open_connections();
        assert_eq!(stats.open_connections(), 0);
        stats.increment_open_connections();
        assert_eq!(stats.open_connections(), 1);
    }

    #[test]
    fn response_times_feed_lifetime_and_window() {
        let stats = test_stats();
        let now = 1_000_000;
        for v in 1..=100 {
            stats.note_response_time_at(v as f64, now);
        }
        assert_eq!(stats.response_time_mean(), 50.5);
        assert_eq!(stats.response_time_percentile_at(50.0, now), 50.0);
        assert_eq!(stats.response_time_percentile_at(99.0, now), 99.0);
        // Window drains, lifetime stays.
        let later = now + 301_000;
        assert_eq!(stats.response_time_percentile_at(50.0, later), 0.0);
        assert_eq!(stats.response_time_mean(), 50.5);
    }

    #[test]
    fn request_counters_roll_off_the_window() {
        let stats = test_stats();
        let now = 1_000_000;
        stats.increment_num_requests_at(now);
        stats.increment_num_requests_at(now);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.measured_request_count_at(now), 2);
        assert_eq!(stats.measured_request_count_at(now + 301_000), 0);
        assert_eq!(stats.total_requests(), 2);
    }

    #[test]
    fn failure_window_is_independent_of_successive_count() {
        let stats = test_stats();
        let now = 1_000_000;
        stats.add_to_failure_count_at(now);
        stats.add_to_failure_count_at(now);
        stats.clear_successive_connection_failures();
        assert_eq!(stats.failure_count_at(now), 2);
    }

    #[test]
    fn first_connection_is_stamped_once() {
        let stats = test_stats();
        stats.increment_active_requests_at(1_000);
        stats.increment_active_requests_at(2_000);
        assert_eq!(stats.first_connection_ms.load(Ordering::Relaxed), 1_000);
    }
}
