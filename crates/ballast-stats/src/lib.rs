//! ballast-stats — per-server request accounting and circuit-breaker state.
//!
//! A [`ServerStats`] tracks everything the balancer needs to know about one
//! backend: request and connection gauges, successive-failure counts for the
//! circuit breaker, a lifetime response-time [`Distribution`], and rolling
//! per-second windows for recent behavior. All counters are updated through
//! atomics or short-lived locks so the hot path never blocks on a reader.

pub mod distribution;
pub mod rolling;
pub mod server_stats;

pub use distribution::Distribution;
pub use rolling::{RollingCounter, RollingSample};
pub use server_stats::{ServerStats, epoch_millis};
