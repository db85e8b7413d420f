//! Recency-weighted latency selection.

use std::sync::{Arc, Weak};

use tracing::warn;

use ballast_core::Server;
use ballast_stats::ServerStats;

use super::{Rule, RuleBase, eligible_servers};
use crate::balancer::LoadBalancer;

/// Scores each eligible server by a recency-weighted blend of its
/// per-second average response times and picks the lowest score.
///
/// The per-second averages come from the rolling window, oldest first.
/// Weights ramp linearly from 0.5 on the oldest second to 1.5 on the
/// newest, so a server that recently slowed down scores worse than one
/// that was slow a while ago. Scores are computed concurrently, one
/// thread per server, mirroring how the stats are laid out per server.
pub struct WeightedResponseTimeRule {
    base: RuleBase,
}

impl WeightedResponseTimeRule {
    pub fn new() -> Self {
        Self {
            base: RuleBase::new(),
        }
    }
}

impl Default for WeightedResponseTimeRule {
    fn default() -> Self {
        Self::new()
    }
}

fn weighted_score(stats: &ServerStats) -> f64 {
    let series = stats.window_response_time_averages();
    match series.len() {
        0 => 0.0,
        1 => series[0],
        len => {
            let delta = 1.0 / (len as f64 - 1.0);
            let mut blended = 0.0;
            let mut weights = 0.0;
            for (position, average) in series.iter().enumerate() {
                let weight = 0.5 + position as f64 * delta;
                blended += average * weight;
                weights += weight;
            }
            blended / weights
        }
    }
}

impl Rule for WeightedResponseTimeRule {
    fn choose(&self, _key: Option<&str>) -> Option<Arc<Server>> {
        let lb = self.base.load_balancer()?;
        let servers = eligible_servers(&*lb);
        if servers.is_empty() {
            return None;
        }
        let stats = lb.load_balancer_stats();
        let scores: Vec<f64> = std::thread::scope(|scope| {
            let handles: Vec<_> = servers
                .iter()
                .map(|server| {
                    let stats = stats.clone();
                    scope.spawn(move || weighted_score(&stats.server_stats(server)))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        warn!("response time scoring panicked");
                        f64::MAX
                    })
                })
                .collect()
        });

        let mut best = 0;
        for (index, score) in scores.iter().enumerate() {
            if *score < scores[best] {
                best = index;
            }
        }
        Some(servers[best].clone())
    }

    fn set_load_balancer(&self, lb: Weak<dyn LoadBalancer>) {
        self.base.set_load_balancer(lb);
    }
}
