//! Lowest-average-latency selection.

use std::sync::{Arc, Weak};

use ballast_core::Server;

use super::{Rule, RuleBase, eligible_servers};
use crate::balancer::LoadBalancer;

/// Picks the eligible server with the lowest lifetime mean response time.
/// A server with no recorded responses scores zero, which makes fresh
/// servers attractive until they accumulate data.
pub struct LeastResponseTimeRule {
    base: RuleBase,
}

impl LeastResponseTimeRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
        }
    }
}

impl Default for LeastResponseTimeRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for LeastResponseTimeRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = eligible_servers(&*lb);
        if servers.is_empty() {
            return None;
        }
        let stats = lb.load_balancer_stats();
        let mut best: Option<(Arc<Server>, f64)> = None;
        for server in servers {
            let mean = stats.server_stats(&server).response_time_mean();
            match &best {
                Some((_, best_mean)) if mean >= *best_mean => {}
                _ => best = Some((server, mean)),
            }
        }
        best.map(|(server, _)| server)
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}
