//! Registry fed by an external server-list source.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use ballast_core::config::{defaults, keys};
use ballast_core::{ClientConfig, Server};

use crate::balancer::LoadBalancer;
use crate::base::BaseLoadBalancer;
use crate::ping::Ping;
use crate::rules::Rule;
use crate::server_list::{ListFilter, ServerList};
use crate::stats::LoadBalancerStats;
use crate::try_lock::TryLock;
use crate::updater::{ListUpdater, PollingListUpdater, UpdateAction};

/// A registry whose fleet comes from a [`ServerList`] source, refreshed on
/// a schedule by a [`ListUpdater`]. Servers arriving through a refresh are
/// adopted as alive; a liveness probe can still be layered on through
/// [`DynamicServerListLoadBalancer::with_parts`].
pub struct DynamicServerListLoadBalancer {
    base: Arc<BaseLoadBalancer>,
    source: Arc<dyn ServerList>,
    filter: Option<Arc<dyn ListFilter>>,
    updater: Arc<dyn ListUpdater>,
    update_cycle: TryLock,
}

impl DynamicServerListLoadBalancer {
    /// Build a registry polling the source at the configured interval,
    /// with no filter and no liveness probe.
    pub fn new(
        config: &ClientConfig,
        rule: Arc<dyn Rule>,
        source: Arc<dyn ServerList>,
    ) -> Arc<Self> {
        Self::with_parts(config, rule, None, source, None, None)
    }

    pub fn with_parts(
        config: &ClientConfig,
        rule: Arc<dyn Rule>,
        ping: Option<Arc<dyn Ping>>,
        source: Arc<dyn ServerList>,
        filter: Option<Arc<dyn ListFilter>>,
        updater: Option<Arc<dyn ListUpdater>>,
    ) -> Arc<Self> {
        let updater = updater.unwrap_or_else(|| {
            let interval = config.get_duration(
                keys::LIST_POLLING_INTERVAL,
                defaults::LIST_POLLING_INTERVAL,
            );
            Arc::new(PollingListUpdater::new(interval))
        });
        let lb = Arc::new(Self {
            base: BaseLoadBalancer::new(config, rule, ping),
            source,
            filter,
            updater,
            update_cycle: TryLock::new(),
        });
        let weak = Arc::downgrade(&lb);
        let action: Weak<dyn UpdateAction> = weak;
        lb.updater.start(action);
        lb.adopt_list(lb.source.initial_servers());
        lb
    }

    pub fn base(&self) -> &Arc<BaseLoadBalancer> {
        &self.base
    }

    pub fn updater(&self) -> &Arc<dyn ListUpdater> {
        &self.updater
    }

    /// Pull a fresh list from the source and adopt it. A failed pull keeps
    /// the current fleet in place.
    pub fn update_list_of_servers(&self) {
        self.adopt_list(self.source.updated_servers());
    }

    fn adopt_list(&self, fetched: anyhow::Result<Vec<Arc<Server>>>) {
        let servers = match fetched {
            Ok(servers) => servers,
            Err(error) => {
                warn!(name = %self.base.name(), %error, "server list fetch failed, keeping current list");
                return;
            }
        };
        let servers = match &self.filter {
            Some(filter) => filter.filter_servers(servers),
            None => servers,
        };
        self.update_all_servers(servers);
    }

    fn update_all_servers(&self, servers: Vec<Arc<Server>>) {
        let Some(_guard) = self.update_cycle.acquire() else {
            debug!(name = %self.base.name(), "list update already in flight");
            return;
        };
        for server in &servers {
            server.set_alive(true);
            server.set_temp_down(false);
        }
        self.set_server_list(servers);
    }

    /// Stop the refresh schedule without shutting the registry down.
    pub fn stop_refreshing(&self) {
        self.updater.stop();
    }
}

impl UpdateAction for DynamicServerListLoadBalancer {
    fn do_update(&self) {
        self.update_list_of_servers();
    }
}

impl LoadBalancer for DynamicServerListLoadBalancer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn add_server(&self, server: Arc<Server>) {
        self.base.add_server(server);
    }

    fn add_servers(&self, servers: Vec<Arc<Server>>) {
        self.base.add_servers(servers);
    }

    fn set_server_list(&self, servers: Vec<Arc<Server>>) {
        self.base.set_server_list(servers.clone());

        let stats = self.base.load_balancer_stats();
        let mut clusters: HashMap<String, Vec<Arc<Server>>> = HashMap::new();
        for server in servers {
            // Warm the per-server stats entry before traffic arrives.
            stats.server_stats(&server);
            let cluster = server.cluster().to_string();
            if !cluster.is_empty() {
                clusters.entry(cluster).or_default().push(server);
            }
        }
        stats.update_cluster_mapping(clusters);
    }

    fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.base.choose_server(key)
    }

    fn mark_server_down(&self, server: &Arc<Server>) {
        self.base.mark_server_down(server);
    }

    fn mark_server_temp_down(&self, server: &Arc<Server>) {
        self.base.mark_server_temp_down(server);
    }

    fn mark_server_ready(&self, server: &Arc<Server>) {
        self.base.mark_server_ready(server);
    }

    fn reachable_servers(&self) -> Vec<Arc<Server>> {
        self.base.reachable_servers()
    }

    fn all_servers(&self) -> Vec<Arc<Server>> {
        self.base.all_servers()
    }

    fn load_balancer_stats(&self) -> Arc<LoadBalancerStats> {
        self.base.load_balancer_stats()
    }

    fn shutdown(&self) {
        self.stop_refreshing();
        self.base.shutdown();
    }
}
