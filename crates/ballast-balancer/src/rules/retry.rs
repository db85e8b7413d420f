//! Deadline-bounded retry wrapper around another rule.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use ballast_core::Server;

use super::Rule;
use crate::balancer::LoadBalancer;

const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_millis(500);
const RETRY_POLL: Duration = Duration::from_millis(10);

/// Keeps asking the wrapped rule until it yields a live, non-sidelined
/// server or the deadline passes. Useful right after a list change, when
/// the health cycle has not yet confirmed anyone alive.
///
/// The wait is a blocking poll on the calling thread. Callers on an async
/// executor should budget the deadline accordingly.
pub struct RetryRule {
    inner: Arc<dyn Rule>,
    max_retry_time: Duration,
}

impl RetryRule {
    pub fn new(inner: Arc<dyn Rule>) -> Self {
        Self {
            inner,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
        }
    }

    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        if max_retry_time > Duration::ZERO {
            self.max_retry_time = max_retry_time;
        }
        self
    }

    pub fn max_retry_time(&self) -> Duration {
        self.max_retry_time
    }
}

impl Rule for RetryRule {
    fn choose(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let deadline = Instant::now() + self.max_retry_time;
        loop {
            if let Some(server) = self.inner.choose(key) {
                if server.is_alive() && !server.is_temp_down() {
                    return Some(server);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(RETRY_POLL);
        }
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.inner.set_load_balancer(lb);
    }
}
