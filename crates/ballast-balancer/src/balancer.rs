//! The load balancer trait.

use std::sync::Arc;

use ballast_core::Server;

use crate::stats::LoadBalancerStats;

/// A server registry with pluggable selection.
///
/// Implementations keep the full server list, the subset the last health
/// cycle reached, and circuit-breaker markings. Rules and the client layer
/// hold this as `Arc<dyn LoadBalancer>`.
pub trait LoadBalancer: Send + Sync {
    /// Client name this balancer serves.
    fn name(&self) -> &str;

    /// Append one server to the registry.
    fn add_server(&self, server: Arc<Server>);

    /// Append several servers to the registry.
    fn add_servers(&self, servers: Vec<Arc<Server>>);

    /// Replace the full server list.
    fn set_server_list(&self, servers: Vec<Arc<Server>>);

    /// Pick a server via the configured rule. The key feeds affinity rules
    /// and is ignored by the rest.
    fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>>;

    /// Remove a server from rotation because it is unreachable.
    fn mark_server_down(&self, server: &Arc<Server>);

    /// Sideline a server because its circuit breaker tripped.
    fn mark_server_temp_down(&self, server: &Arc<Server>);

    /// Return a sidelined server to rotation.
    fn mark_server_ready(&self, server: &Arc<Server>);

    /// Servers the last health cycle could reach.
    fn reachable_servers(&self) -> Vec<Arc<Server>>;

    /// Every configured server, reachable or not.
    fn all_servers(&self) -> Vec<Arc<Server>>;

    /// Per-server and per-cluster accounting for this balancer.
    fn load_balancer_stats(&self) -> Arc<LoadBalancerStats>;

    /// Stop background tasks. Safe to call more than once.
    fn shutdown(&self);
}
