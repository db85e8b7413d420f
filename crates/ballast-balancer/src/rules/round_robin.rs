//! Round-robin selection.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicUsize;

use ballast_core::Server;

use super::{Rule, RuleBase, eligible_servers, next_index};
use crate::balancer::LoadBalancer;

/// Cycles through eligible servers with a shared position counter.
pub struct RoundRobinRule {
    base: RuleBase,
    position: AtomicUsize,
}

impl RoundRobinRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
            position: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for RoundRobinRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = eligible_servers(&*lb);
        if servers.is_empty() {
            return None;
        }
        let index = next_index(&self.position, servers.len());
        Some(servers[index].clone())
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
    use std::collections::HashMap;

    fn balancer_with(rule: Arc<dyn Rule>, list: &str) -> Arc<BaseLoadBalancer> {
        let config = ClientConfig::new("round-robin-test");
        let lb = BaseLoadBalancer::new(&config, rule, None);
        lb.set_server_list(parse_server_list(list).unwrap());
        lb
    }

    #[tokio::test]
    async fn visits_every_server_once_per_cycle() {
        let rule = Arc::new(RoundRobinRule::new());
        let lb = balancer_with(rule.clone(), "a:80,b:80,c:80");

        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..6 {
            let server = rule.choose(None).unwrap();
            *hits.entry(server.host_port()).or_default() += 1;
        }
        assert_eq!(hits.len(), 3);
        assert!(hits.values().all(|&count| count == 2));
        lb.shutdown();
    }

    #[tokio::test]
    async fn skips_sidelined_servers() {
        let rule = Arc::new(RoundRobinRule::new());
        let lb = balancer_with(rule.clone(), "a:80,b:80");
        let sidelined = lb
            .all_servers()
            .into_iter()
            .find(|s| s.host_port() == "b:80")
            .unwrap();
        lb.mark_server_temp_down(&sidelined);

        for _ in 0..4 {
            assert_eq!(rule.choose(None).unwrap().host_port(), "a:80");
        }
        lb.shutdown();
    }

    #[test]
    fn unattached_rule_chooses_nothing() {
        let rule = RoundRobinRule::new();
        assert!(rule.choose(None).is_none());
    }
}
