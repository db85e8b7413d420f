//! Core server registry with health checking and circuit recovery.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ballast_core::config::{defaults, keys};
use ballast_core::server::server_lists_equal;
use ballast_core::{ClientConfig, Server};

use crate::balancer::LoadBalancer;
use crate::ping::{ParallelPingStrategy, Ping, PingStrategy};
use crate::rules::Rule;
use crate::server_list::{ListChangeListener, StatusChangeListener};
use crate::stats::LoadBalancerStats;
use crate::try_lock::TryLock;

const RECOVER_INTERVAL: Duration = Duration::from_secs(1);
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

struct Tasks {
    shutdown_tx: watch::Sender<bool>,
    ping: Option<JoinHandle<()>>,
    recover: Option<JoinHandle<()>>,
}

/// The standard registry.
///
/// Holds three views of the fleet: every configured server, the servers
/// the last health cycle reached, and the servers the circuit breaker has
/// sidelined. A ping task refreshes the reachable view on an interval; a
/// recovery task returns sidelined servers to rotation once their breaker
/// closes. Construction spawns both tasks, so it must happen inside a
/// Tokio runtime.
pub struct BaseLoadBalancer {
    name: String,
    self_ref: Weak<BaseLoadBalancer>,
    rule: Arc<dyn Rule>,
    ping: Option<Arc<dyn Ping>>,
    ping_strategy: Arc<dyn PingStrategy>,
    ping_interval: RwLock<Duration>,
    lb_stats: Arc<LoadBalancerStats>,
    all: RwLock<Vec<Arc<Server>>>,
    up: RwLock<Vec<Arc<Server>>>,
    temp_down: RwLock<Vec<Arc<Server>>>,
    list_listeners: RwLock<Vec<Arc<dyn ListChangeListener>>>,
    status_listeners: RwLock<Vec<Arc<dyn StatusChangeListener>>>,
    ping_cycle: TryLock,
    recover_cycle: TryLock,
    tasks: Mutex<Tasks>,
}

impl BaseLoadBalancer {
    /// Build a registry with the default parallel ping strategy. Passing
    /// no ping means liveness is taken on faith: every server set through
    /// [`LoadBalancer::set_server_list`] is immediately reachable.
    pub fn new(
        config: &ClientConfig,
        rule: Arc<dyn Rule>,
        ping: Option<Arc<dyn Ping>>,
    ) -> Arc<Self> {
        Self::with_strategy(config, rule, ping, Arc::new(ParallelPingStrategy))
    }

    pub fn with_strategy(
        config: &ClientConfig,
        rule: Arc<dyn Rule>,
        ping: Option<Arc<dyn Ping>>,
        ping_strategy: Arc<dyn PingStrategy>,
    ) -> Arc<Self> {
        let interval = config
            .get_duration(keys::PING_INTERVAL, defaults::PING_INTERVAL)
            .max(MIN_PING_INTERVAL);
        let (shutdown_tx, _) = watch::channel(false);
        let lb = Arc::new_cyclic(|self_ref| Self {
            name: config.client_name().to_string(),
            self_ref: self_ref.clone(),
            rule,
            ping,
            ping_strategy,
            ping_interval: RwLock::new(interval),
            lb_stats: Arc::new(LoadBalancerStats::new(config)),
            all: RwLock::new(Vec::new()),
            up: RwLock::new(Vec::new()),
            temp_down: RwLock::new(Vec::new()),
            list_listeners: RwLock::new(Vec::new()),
            status_listeners: RwLock::new(Vec::new()),
            ping_cycle: TryLock::new(),
            recover_cycle: TryLock::new(),
            tasks: Mutex::new(Tasks {
                shutdown_tx,
                ping: None,
                recover: None,
            }),
        });
        let weak: Weak<dyn LoadBalancer> = lb.self_ref.clone();
        lb.rule.set_load_balancer(weak);
        if lb.ping.is_some() {
            lb.spawn_ping_task();
        }
        lb.spawn_recover_task();
        info!(name = %lb.name, "load balancer started");
        lb
    }

    /// Register for full-list replacements. Listeners run synchronously on
    /// the updating task and must not block.
    pub fn add_list_change_listener(&self, listener: Arc<dyn ListChangeListener>) {
        self.list_listeners
            .write()
            .expect("listener lock")
            .push(listener);
    }

    /// Register for per-server liveness flips.
    pub fn add_status_change_listener(&self, listener: Arc<dyn StatusChangeListener>) {
        self.status_listeners
            .write()
            .expect("listener lock")
            .push(listener);
    }

    pub fn ping_interval(&self) -> Duration {
        *self.ping_interval.read().expect("balancer lock")
    }

    /// Change the health-check cadence and reschedule the ping task.
    /// Intervals under one second are rejected.
    pub fn set_ping_interval(&self, interval: Duration) {
        if interval < MIN_PING_INTERVAL {
            warn!(name = %self.name, ?interval, "ping interval below the 1s floor, ignoring");
            return;
        }
        *self.ping_interval.write().expect("balancer lock") = interval;
        if self.ping.is_some() {
            self.spawn_ping_task();
        }
    }

    /// Probe every server once and rebuild the reachable list. Overlapping
    /// cycles are skipped, not queued.
    pub async fn run_ping_cycle(&self) {
        let Some(ping) = self.ping.clone() else {
            return;
        };
        let Some(_guard) = self.ping_cycle.acquire() else {
            debug!(name = %self.name, "ping cycle already in flight");
            return;
        };
        let snapshot = self.all_servers();
        if snapshot.is_empty() {
            return;
        }
        let results = self
            .ping_strategy
            .ping_servers(ping, snapshot.clone())
            .await;

        let mut new_up = Vec::with_capacity(snapshot.len());
        let mut flipped = Vec::new();
        for (server, alive) in snapshot.iter().zip(results) {
            if server.is_alive() != alive {
                flipped.push(server.clone());
            }
            server.set_alive(alive);
            if alive {
                server.set_temp_down(false);
                new_up.push(server.clone());
            }
        }

        // A cycle that reaches nobody keeps the whole fleet selectable
        // instead of blackholing every request during a probe blind spot.
        if new_up.is_empty() {
            warn!(name = %self.name, "health cycle reached no servers, keeping the full list selectable");
            *self.up.write().expect("server list lock") = snapshot;
        } else {
            *self.up.write().expect("server list lock") = new_up;
        }
        self.notify_status_changed(&flipped);
    }

    /// Return sidelined servers to rotation once their breaker closes.
    /// Dead servers leave the sideline too; the reachable list already
    /// excludes them.
    pub fn run_recover_cycle(&self) {
        let Some(_guard) = self.recover_cycle.acquire() else {
            return;
        };
        let name = &self.name;
        let stats = &self.lb_stats;
        self.temp_down
            .write()
            .expect("server list lock")
            .retain(|server| {
                if !server.is_temp_down() {
                    return false;
                }
                if !server.is_alive() {
                    server.set_temp_down(false);
                    return false;
                }
                if !stats.server_stats(server).is_circuit_breaker_tripped() {
                    server.set_temp_down(false);
                    debug!(name = %name, server = %server, "circuit closed, server back in rotation");
                    return false;
                }
                true
            });
    }

    fn spawn_ping_task(&self) {
        let interval = self.ping_interval();
        let weak = self.self_ref.clone();
        let mut tasks = self.tasks.lock().expect("balancer lock");
        if let Some(handle) = tasks.ping.take() {
            handle.abort();
        }
        let mut shutdown_rx = tasks.shutdown_tx.subscribe();
        tasks.ping = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(lb) = weak.upgrade() else { break };
                        lb.run_ping_cycle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("ping loop shutting down");
                        break;
                    }
                }
            }
        }));
    }

    fn spawn_recover_task(&self) {
        let weak = self.self_ref.clone();
        let mut tasks = self.tasks.lock().expect("balancer lock");
        let mut shutdown_rx = tasks.shutdown_tx.subscribe();
        tasks.recover = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(RECOVER_INTERVAL) => {
                        let Some(lb) = weak.upgrade() else { break };
                        lb.run_recover_cycle();
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));
    }

    /// Run one ping cycle now, off the regular schedule.
    fn kick_ping_cycle(&self) {
        if let Some(lb) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                lb.run_ping_cycle().await;
            });
        }
    }

    fn notify_list_changed(&self, old: &[Arc<Server>], new: &[Arc<Server>]) {
        let listeners = self.list_listeners.read().expect("listener lock").clone();
        for listener in listeners {
            listener.server_list_changed(old, new);
        }
    }

    fn notify_status_changed(&self, changed: &[Arc<Server>]) {
        if changed.is_empty() {
            return;
        }
        let listeners = self.status_listeners.read().expect("listener lock").clone();
        for listener in listeners {
            listener.server_status_changed(changed);
        }
    }
}

impl LoadBalancer for BaseLoadBalancer {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_server(&self, server: Arc<Server>) {
        self.add_servers(vec![server]);
    }

    fn add_servers(&self, servers: Vec<Arc<Server>>) {
        if servers.is_empty() {
            return;
        }
        let mut all = self.all_servers();
        all.extend(servers);
        self.set_server_list(all);
    }

    fn set_server_list(&self, servers: Vec<Arc<Server>>) {
        let changed = {
            let all = self.all.read().expect("server list lock");
            !server_lists_equal(&all, &servers)
        };
        if changed {
            let old = self.all_servers();
            info!(name = %self.name, old = old.len(), new = servers.len(), "server list replaced");
            self.notify_list_changed(&old, &servers);
        }
        *self.all.write().expect("server list lock") = servers.clone();
        self.temp_down.write().expect("server list lock").clear();
        self.lb_stats.retain_servers(&servers);

        if self.ping.is_none() {
            for server in &servers {
                server.set_alive(true);
                server.set_temp_down(false);
            }
            *self.up.write().expect("server list lock") = servers;
            return;
        }

        // Keep the reachable view inside the new fleet until the next
        // probe; removed servers must not linger in rotation.
        self.up
            .write()
            .expect("server list lock")
            .retain(|server| servers.contains(server));
        if changed {
            self.spawn_ping_task();
            self.kick_ping_cycle();
        }
    }

    fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.rule.choose(key)
    }

    fn mark_server_down(&self, server: &Arc<Server>) {
        if !server.is_alive() {
            return;
        }
        server.set_alive(false);
        self.up
            .write()
            .expect("server list lock")
            .retain(|s| s != server);
        warn!(name = %self.name, server = %server, "server marked down");
        self.notify_status_changed(std::slice::from_ref(server));
    }

    fn mark_server_temp_down(&self, server: &Arc<Server>) {
        if !server.is_alive() || server.is_temp_down() {
            return;
        }
        server.set_temp_down(true);
        self.temp_down
            .write()
            .expect("server list lock")
            .push(server.clone());
        warn!(name = %self.name, server = %server, "circuit opened, server sidelined");
    }

    fn mark_server_ready(&self, server: &Arc<Server>) {
        if !server.is_temp_down() {
            return;
        }
        server.set_temp_down(false);
        self.temp_down
            .write()
            .expect("server list lock")
            .retain(|s| s != server);
        info!(name = %self.name, server = %server, "server back in rotation");
    }

    fn reachable_servers(&self) -> Vec<Arc<Server>> {
        self.up.read().expect("server list lock").clone()
    }

    fn all_servers(&self) -> Vec<Arc<Server>> {
        self.all.read().expect("server list lock").clone()
    }

    fn load_balancer_stats(&self) -> Arc<LoadBalancerStats> {
        self.lb_stats.clone()
    }

    fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("balancer lock");
        let _ = tasks.shutdown_tx.send(true);
        if let Some(handle) = tasks.ping.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.recover.take() {
            handle.abort();
        }
        info!(name = %self.name, "load balancer stopped");
    }
}
