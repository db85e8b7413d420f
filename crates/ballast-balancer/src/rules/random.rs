//! Random selection.

use std::sync::{Arc, Weak};

use rand::Rng;

use ballast_core::Server;

use super::{Rule, RuleBase};
use crate::balancer::LoadBalancer;

const MAX_DRAWS: usize = 20;

/// Uniform pick among reachable servers. Sidelined servers are skipped by
/// redrawing a bounded number of times, so a mostly-tripped fleet degrades
/// to `None` instead of spinning.
pub struct RandomRule {
    base: RuleBase,
}

impl RandomRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
        }
    }
}

impl Default for RandomRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for RandomRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = lb.reachable_servers();
        if servers.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_DRAWS {
            let candidate = &servers[rng.gen_range(0..servers.len())];
            if !candidate.is_temp_down() {
                return Some(candidate.clone());
            }
        }
        None
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseLoadBalancer;
    use ballast_core::{ClientConfig, server::parse_server_list};

    #[tokio::test]
    async fn picks_only_reachable_servers() {
        let config = ClientConfig::new("random-test");
        let rule = Arc::new(RandomRule::new());
        let lb = BaseLoadBalancer::new(&config, rule.clone(), None);
        lb.set_server_list(parse_server_list("a:80,b:80,c:80").unwrap());

        for _ in 0..20 {
            let server = rule.choose(None).unwrap();
            assert!(lb.reachable_servers().contains(&server));
        }
        lb.shutdown();
    }

    #[tokio::test]
    async fn fully_sidelined_fleet_yields_none() {
        let config = ClientConfig::new("random-test");
        let rule = Arc::new(RandomRule::new());
        let lb = BaseLoadBalancer::new(&config, rule.clone(), None);
        let servers = parse_server_list("a:80,b:80").unwrap();
        lb.set_server_list(servers.clone());
        for server in &servers {
            lb.mark_server_temp_down(server);
        }

        assert!(rule.choose(None).is_none());
        lb.shutdown();
    }

    #[test]
    fn empty_pool_yields_none() {
        let rule = RandomRule::new();
        assert!(rule.choose(None).is_none());
    }
}
