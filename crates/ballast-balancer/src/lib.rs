//! ballast-balancer — server registry, health checking, and selection rules.
//!
//! The registry keeps three views of the server fleet: every configured
//! server, the servers the last health-check cycle could reach, and the
//! servers the circuit breaker has temporarily sidelined. Selection rules
//! pick from those views; background tasks keep them fresh.
//!
//! # Architecture
//!
//! ```text
//! BaseLoadBalancer
//!   ├── server lists (all / up / temp-down)
//!   ├── Rule (pluggable selection strategy)
//!   ├── Ping + PingStrategy (liveness cycle)
//!   ├── LoadBalancerStats (per-server and per-cluster accounting)
//!   └── background tasks (ping cycle, circuit recovery)
//!
//! DynamicServerListLoadBalancer
//!   ├── BaseLoadBalancer (everything above)
//!   ├── ServerList (source of fresh servers)
//!   ├── ListFilter (optional trim before adoption)
//!   └── PollingListUpdater (periodic refresh)
//! ```

pub mod balancer;
pub mod base;
pub mod dynamic;
pub mod ping;
pub mod rules;
pub mod server_list;
pub mod stats;
pub mod try_lock;
pub mod updater;

pub use balancer::LoadBalancer;
pub use base::BaseLoadBalancer;
pub use dynamic::DynamicServerListLoadBalancer;
pub use ping::{NoOpPing, Ping, PingStrategy, UrlPing};
pub use rules::Rule;
pub use server_list::{
    ConfigServerList, ListChangeListener, ListFilter, ServerList, StatusChangeListener,
};
pub use stats::{ClusterSnapshot, ClusterStats, LoadBalancerStats};
pub use try_lock::TryLock;
pub use updater::{ListUpdater, PollingListUpdater, UpdateAction};
