//! Fewest-open-connections selection.

use std::sync::{Arc, Weak};

use ballast_core::Server;

use super::{Rule, RuleBase, eligible_servers};
use crate::balancer::LoadBalancer;

/// Picks the eligible server with the fewest open connections. Ties go to
/// the first server encountered.
pub struct LeastConnectionRule {
    base: RuleBase,
}

impl LeastConnectionRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
        }
    }
}

impl Default for LeastConnectionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for LeastConnectionRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = eligible_servers(&*lb);
        if servers.is_empty() {
            return None;
        }
        let stats = lb.load_balancer_stats();
        servers
            .into_iter()
            .min_by_key(|server| stats.server_stats(server).open_connections())
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}
