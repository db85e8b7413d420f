//! Smooth weighted round-robin selection.

use std::sync::{Arc, Mutex, Weak};

use ballast_core::{Server, server::server_lists_equal};

use super::{Rule, RuleBase, eligible_servers};
use crate::balancer::LoadBalancer;

struct Entry {
    server: Arc<Server>,
    weight: i64,
    current: i64,
}

struct SmoothState {
    servers: Vec<Arc<Server>>,
    entries: Vec<Entry>,
}

/// Weighted round robin without the bursts: every pick raises each
/// server's running score by its weight and takes the highest scorer,
/// then drops the winner by the weight total. Weights [5,1,1] come out
/// as a,a,b,a,c,a,a rather than a,a,a,a,a,b,c.
pub struct SmoothWeightedRoundRobinRule {
    base: RuleBase,
    state: Mutex<SmoothState>,
}

impl SmoothWeightedRoundRobinRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
            state: Mutex::new(SmoothState {
                servers: Vec::new(),
                entries: Vec::new(),
            }),
        }
    }
}

impl Default for SmoothWeightedRoundRobinRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for SmoothWeightedRoundRobinRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let eligible = eligible_servers(&*lb);
        if eligible.is_empty() {
            return None;
        }

        let mut state = self.state.lock().expect("rule lock");
        if !server_lists_equal(&state.servers, &eligible) {
            state.entries = eligible
                .iter()
                .map(|server| Entry {
                    server: server.clone(),
                    weight: i64::from(server.weight()),
                    current: 0,
                })
                .collect();
            state.servers = eligible;
        }

        let total: i64 = state.entries.iter().map(|entry| entry.weight).sum();
        if total <= 0 {
            return None;
        }
        for entry in state.entries.iter_mut() {
            entry.current += entry.weight;
        }
        let mut winner = 0;
        for (index, entry) in state.entries.iter().enumerate() {
            if entry.current > state.entries[winner].current {
                winner = index;
            }
        }
        state.entries[winner].current -= total;
        Some(state.entries[winner].server.clone())
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

    fn sequence(rule: &SmoothWeightedRoundRobinRule, picks: usize) -> Vec<String> {
        (0..picks)
            .map(|_| rule.choose(None).unwrap().host_port())
            .collect()
    }

    #[tokio::test]
    async fn interleaves_instead_of_bursting() {
        let config = ClientConfig::new("smooth-wrr-test");
        let rule = Arc::new(SmoothWeightedRoundRobinRule::new());
        let lb = BaseLoadBalancer::new(&config, rule.clone(), None);
        lb.set_server_list(parse_server_list("a:80|2,b:80|1,c:80|1").unwrap());

        assert_eq!(sequence(&rule, 4), vec!["a:80", "b:80", "c:80", "a:80"]);
        lb.shutdown();
    }

    #[tokio::test]
    async fn shares_follow_the_weights() {
        let config = ClientConfig::new("smooth-wrr-test");
        let rule = Arc::new(SmoothWeightedRoundRobinRule::new());
        let lb = BaseLoadBalancer::new(&config, rule.clone(), None);
        lb.set_server_list(parse_server_list("a:80|5,b:80|1,c:80|1").unwrap());

        let mut hits: HashMap<String, usize> = HashMap::new();
        for pick in sequence(&rule, 14) {
            *hits.entry(pick).or_default() += 1;
        }
        assert_eq!(hits["a:80"], 10);
        assert_eq!(hits["b:80"], 2);
        assert_eq!(hits["c:80"], 2);
        lb.shutdown();
    }

    #[tokio::test]
    async fn zero_weight_fleet_yields_none() {
        let config = ClientConfig::new("smooth-wrr-test");
        let rule = Arc::new(SmoothWeightedRoundRobinRule::new());
        let lb = BaseLoadBalancer::new(&config, rule.clone(), None);
        lb.set_server_list(parse_server_list("a:80|0").unwrap());

        assert!(rule.choose(None).is_none());
        lb.shutdown();
    }
}
