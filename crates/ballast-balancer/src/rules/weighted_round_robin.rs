//! Weight-expanded round-robin selection.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, RwLock, Weak};

use ballast_core::{Server, server::server_lists_equal};

use super::{Rule, RuleBase, eligible_servers, next_index};
use crate::balancer::LoadBalancer;
use crate::try_lock::TryLock;

struct PoolState {
    servers: Vec<Arc<Server>>,
    pool: Vec<Arc<Server>>,
}

/// Round robin over a weight-expanded pool: a server with weight three
/// holds three consecutive slots per cycle, so selection stays O(1).
///
/// The pool is rebuilt only when the eligible set changes. The rebuild is
/// guarded by a try-lock; a caller that loses the race keeps serving from
/// the stale pool instead of rebuilding twice.
pub struct WeightedRoundRobinRule {
    base: RuleBase,
    refreshing: TryLock,
    state: RwLock<PoolState>,
    position: AtomicUsize,
}

impl WeightedRoundRobinRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
            refreshing: TryLock::new(),
            state: RwLock::new(PoolState {
                servers: Vec::new(),
                pool: Vec::new(),
            }),
            position: AtomicUsize::new(0),
        }
    }

    fn refresh_pool(&self, eligible: &[Arc<Server>]) {
        {
            let state = self.state.read().expect("rule lock");
            if server_lists_equal(&state.servers, eligible) {
                return;
            }
        }
        let Some(_guard) = self.refreshing.acquire() else {
            return;
        };
        let mut pool = Vec::new();
        for server in eligible {
            for _ in 0..server.weight() {
                pool.push(server.clone());
            }
        }
        let mut state = self.state.write().expect("rule lock");
        state.servers = eligible.to_vec();
        state.pool = pool;
    }
}

impl Default for WeightedRoundRobinRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for WeightedRoundRobinRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let eligible = eligible_servers(&*lb);
        if eligible.is_empty() {
            return None;
        }
        self.refresh_pool(&eligible);

        let state = self.state.read().expect("rule lock");
        if state.pool.is_empty() {
            return None;
        }
        let index = next_index(&self.position, state.pool.len());
        Some(state.pool[index].clone())
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}
