//! Pluggable server selection strategies.
//!
//! Every rule skips servers whose circuit breaker currently sidelines
//! them, so a tripped server receives no traffic from any strategy until
//! the recovery task returns it to rotation.

mod hash;
mod least_connection;
mod least_response_time;
mod random;
mod retry;
mod round_robin;
mod smooth_weighted_round_robin;
mod weighted_response_time;
mod weighted_round_robin;

pub use hash::HashRule;
pub use least_connection::LeastConnectionRule;
pub use least_response_time::LeastResponseTimeRule;
pub use random::RandomRule;
pub use retry::RetryRule;
pub use round_robin::RoundRobinRule;
pub use smooth_weighted_round_robin::SmoothWeightedRoundRobinRule;
pub use weighted_response_time::WeightedResponseTimeRule;
pub use weighted_round_robin::WeightedRoundRobinRule;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use ballast_core::Server;

use crate::balancer::LoadBalancer;

/// A server selection strategy.
///
/// The key is an opaque affinity token. Deterministic rules route a fixed
/// key to a fixed server; the rest ignore it.
pub trait Rule: Send + Sync {
    fn choose(&self, key: Option<&str>) -> Option<Arc<Server>>;

    /// Attach the balancer whose servers this rule picks from. The rule
    /// holds it weakly; the balancer owns the rule.
    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>);
}

/// Balancer attachment shared by the rule implementations.
pub struct RuleBase {
    lb: RwLock<Option<Weak<dyn LoadBalancer>>>,
}

impl RuleBase {
    pub fn new() -> Self {
        Self {
            lb: RwLock::new(None),
        }
    }

    pub fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        *self.lb.write().expect("rule lock") = Some(lb);
    }

    /// The attached balancer, if one was set and is still alive.
    pub fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.lb
            .read()
            .expect("rule lock")
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl Default for RuleBase {
    fn default() -> Self {
        Self::new()
    }
}

/// Reachable servers minus the ones the circuit breaker has sidelined.
pub fn eligible_servers(lb: &dyn LoadBalancer) -> Vec<Arc<Server>> {
    let mut servers = lb.reachable_servers();
    servers.retain(|server| !server.is_temp_down());
    servers
}

/// Advance a shared cyclic counter and return the new position.
pub(crate) fn next_index(counter: &AtomicUsize, len: usize) -> usize {
    loop {
        let current = counter.load(Ordering::Acquire);
        let next = (current + 1) % len;
        if counter
            .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return next;
        }
    }
}
