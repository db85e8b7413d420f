//! Balancer-wide accounting: per-server stats cache and cluster views.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use ballast_core::config::{defaults, keys};
use ballast_core::{ClientConfig, Server};
use ballast_stats::{ServerStats, epoch_millis};

/// Point-in-time aggregate over one cluster's servers.
///
/// `load_per_server` is the active-request load averaged over the servers
/// whose circuit is closed; it reads -1 when every server is tripped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub instance_count: usize,
    pub load_per_server: f64,
    pub circuit_tripped_count: usize,
    pub active_requests_count: i64,
}

/// Owns the [`ServerStats`] cache for one balancer and the cluster to
/// server mapping derived from the server list.
///
/// Entries are created lazily on first access and pruned when the server
/// list is replaced, so stats never outlive their server by more than one
/// list generation.
pub struct LoadBalancerStats {
    name: String,
    connection_failure_threshold: u32,
    circuit_tripped_timeout_factor: u32,
    max_circuit_tripped_timeout: Duration,
    server_stats: RwLock<HashMap<Arc<Server>, Arc<ServerStats>>>,
    cluster_servers: RwLock<HashMap<String, Vec<Arc<Server>>>>,
}

impl LoadBalancerStats {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            name: config.client_name().to_string(),
            connection_failure_threshold: config.get_int(
                keys::CONNECTION_FAILURE_THRESHOLD,
                defaults::CONNECTION_FAILURE_THRESHOLD,
            ) as u32,
            circuit_tripped_timeout_factor: config.get_int(
                keys::CIRCUIT_TRIPPED_TIMEOUT_FACTOR,
                defaults::CIRCUIT_TRIPPED_TIMEOUT_FACTOR,
            ) as u32,
            max_circuit_tripped_timeout: config.get_duration(
                keys::CIRCUIT_TRIP_MAX_TIMEOUT,
                defaults::CIRCUIT_TRIP_MAX_TIMEOUT,
            ),
            server_stats: RwLock::new(HashMap::new()),
            cluster_servers: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stats for one server, created with this balancer's breaker settings
    /// on first access. Servers with equal identity share an entry.
    pub fn server_stats(&self, server: &Arc<Server>) -> Arc<ServerStats> {
        if let Some(stats) = self.server_stats.read().expect("stats lock").get(server) {
            return stats.clone();
        }
        let mut map = self.server_stats.write().expect("stats lock");
        map.entry(server.clone())
            .or_insert_with(|| {
                Arc::new(ServerStats::new(server.clone()).with_breaker(
                    self.connection_failure_threshold,
                    self.circuit_tripped_timeout_factor,
                    self.max_circuit_tripped_timeout,
                ))
            })
            .clone()
    }

    /// Drop stats for servers that left the list.
    pub fn retain_servers(&self, current: &[Arc<Server>]) {
        let keep: HashSet<&Arc<Server>> = current.iter().collect();
        let mut map = self.server_stats.write().expect("stats lock");
        let before = map.len();
        map.retain(|server, _| keep.contains(server));
        if map.len() < before {
            debug!(client = %self.name, pruned = before - map.len(), "pruned stats for removed servers");
        }
    }

    /// Replace the cluster to server mapping.
    pub fn update_cluster_mapping(&self, clusters: HashMap<String, Vec<Arc<Server>>>) {
        *self.cluster_servers.write().expect("stats lock") = clusters;
    }

    pub fn available_clusters(&self) -> Vec<String> {
        self.cluster_servers
            .read()
            .expect("stats lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn cluster_servers(&self, cluster: &str) -> Vec<Arc<Server>> {
        self.cluster_servers
            .read()
            .expect("stats lock")
            .get(cluster)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of one named cluster.
    pub fn cluster_snapshot(&self, cluster: &str) -> ClusterSnapshot {
        let servers = self.cluster_servers(cluster);
        self.snapshot_of(&servers)
    }

    /// Snapshot over an arbitrary server set.
    pub fn snapshot_of(&self, servers: &[Arc<Server>]) -> ClusterSnapshot {
        let now = epoch_millis();
        let mut tripped = 0usize;
        let mut total_active = 0i64;
        let mut active_on_available = 0i64;

        for server in servers {
            let stats = self.server_stats(server);
            let active = stats.active_requests_at(now);
            total_active += active;
            if stats.is_circuit_breaker_tripped_at(now) {
                tripped += 1;
            } else {
                active_on_available += active;
            }
        }

        let load_per_server = if servers.is_empty() {
            0.0
        } else if tripped == servers.len() {
            -1.0
        } else {
            active_on_available as f64 / (servers.len() - tripped) as f64
        };

        ClusterSnapshot {
            instance_count: servers.len(),
            load_per_server,
            circuit_tripped_count: tripped,
            active_requests_count: total_active,
        }
    }

    /// Requests observed inside the rolling window, summed over a cluster.
    pub fn measured_cluster_hits(&self, cluster: &str) -> u64 {
        self.cluster_servers(cluster)
            .iter()
            .map(|server| self.server_stats(server).measured_request_count())
            .sum()
    }

    /// Handle bound to one cluster name.
    pub fn cluster_stats(self: &Arc<Self>, cluster: impl Into<String>) -> ClusterStats {
        ClusterStats {
            cluster: cluster.into(),
            lb_stats: self.clone(),
        }
    }
}

/// A [`LoadBalancerStats`] view pinned to one cluster.
#[derive(Clone)]
pub struct ClusterStats {
    cluster: String,
    lb_stats: Arc<LoadBalancerStats>,
}

impl ClusterStats {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.lb_stats.cluster_snapshot(&self.cluster)
    }

    pub fn instance_count(&self) -> usize {
        self.snapshot().instance_count
    }

    pub fn active_requests_count(&self) -> i64 {
        self.snapshot().active_requests_count
    }

    pub fn circuit_tripped_count(&self) -> usize {
        self.snapshot().circuit_tripped_count
    }

    pub fn load_per_server(&self) -> f64 {
        self.snapshot().load_per_server
    }

    pub fn measured_hits(&self) -> u64 {
        self.lb_stats.measured_cluster_hits(&self.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::new("test");
        config.set_property(keys::CONNECTION_FAILURE_THRESHOLD, 2);
        config
    }

    fn server(host: &str) -> Arc<Server> {
        Arc::new(Server::new("http", host, 80))
    }

    #[test]
    fn equal_identity_shares_a_stats_entry() {
        let stats = LoadBalancerStats::new(&test_config());
        let a1 = server("a");
        let a2 = server("a");
        let entry1 = stats.server_stats(&a1);
        let entry2 = stats.server_stats(&a2);
        entry1.increment_num_requests();
        assert_eq!(entry2.total_requests(), 1);
    }

    #[test]
    fn breaker_settings_come_from_config() {
        let stats = LoadBalancerStats::new(&test_config());
        let entry = stats.server_stats(&server("a"));
        entry.increment_successive_connection_failures();
        assert!(!entry.is_circuit_breaker_tripped());
        entry.increment_successive_connection_failures();
        assert!(entry.is_circuit_breaker_tripped());
    }

    #[test]
    fn retain_prunes_departed_servers() {
        let stats = LoadBalancerStats::new(&test_config());
        let a = server("a");
        let b = server("b");
        stats.server_stats(&a).increment_num_requests();
        stats.server_stats(&b).increment_num_requests();

        stats.retain_servers(std::slice::from_ref(&a));
        // The survivor keeps its history, the departed starts fresh.
        assert_eq!(stats.server_stats(&a).total_requests(), 1);
        assert_eq!(stats.server_stats(&b).total_requests(), 0);
    }

    #[test]
    fn snapshot_averages_load_over_untripped_servers() {
        let stats = LoadBalancerStats::new(&test_config());
        let servers = vec![server("a"), server("b"), server("c")];

        stats.server_stats(&servers[0]).increment_active_requests();
        stats.server_stats(&servers[0]).increment_active_requests();
        stats.server_stats(&servers[1]).increment_active_requests();
        // Trip c's breaker.
        let c = stats.server_stats(&servers[2]);
        c.increment_successive_connection_failures();
        c.increment_successive_connection_failures();
        c.increment_active_requests();

        let snapshot = stats.snapshot_of(&servers);
        assert_eq!(snapshot.instance_count, 3);
        assert_eq!(snapshot.circuit_tripped_count, 1);
        assert_eq!(snapshot.active_requests_count, 4);
        // 3 active requests over the 2 untripped servers.
        assert_eq!(snapshot.load_per_server, 1.5);
    }

    #[test]
    fn snapshot_reports_negative_load_when_all_tripped() {
        let stats = LoadBalancerStats::new(&test_config());
        let servers = vec![server("a")];
        let entry = stats.server_stats(&servers[0]);
        entry.increment_successive_connection_failures();
        entry.increment_successive_connection_failures();

        let snapshot = stats.snapshot_of(&servers);
        assert_eq!(snapshot.load_per_server, -1.0);
        assert_eq!(snapshot.circuit_tripped_count, 1);
    }

    #[test]
    fn empty_cluster_snapshot_is_zeroed() {
        let stats = LoadBalancerStats::new(&test_config());
        let snapshot = stats.cluster_snapshot("nowhere");
        assert_eq!(snapshot.instance_count, 0);
        assert_eq!(snapshot.load_per_server, 0.0);
    }

    #[test]
    fn cluster_mapping_feeds_cluster_views() {
        let stats = Arc::new(LoadBalancerStats::new(&test_config()));
        let a = server("a");
        let b = server("b");
        let mut clusters = HashMap::new();
        clusters.insert("east".to_string(), vec![a.clone(), b.clone()]);
        stats.update_cluster_mapping(clusters);

        assert_eq!(stats.available_clusters(), vec!["east".to_string()]);

        stats.server_stats(&a).increment_num_requests();
        stats.server_stats(&b).increment_num_requests();
        let east = stats.cluster_stats("east");
        assert_eq!(east.instance_count(), 2);
        assert_eq!(east.measured_hits(), 2);
    }
}
