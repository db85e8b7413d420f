//! Strategies for probing a server list.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use ballast_core::Server;

use super::Ping;

/// Boxed future resolving to one liveness flag per probed server, in the
/// same order as the input list.
pub type PingResultsFuture = Pin<Box<dyn Future<Output = Vec<bool>> + Send + 'static>>;

/// Runs one health-check cycle over a server snapshot.
pub trait PingStrategy: Send + Sync {
    fn ping_servers(&self, ping: Arc<dyn Ping>, servers: Vec<Arc<Server>>) -> PingResultsFuture;
}

/// Probes servers one at a time.
///
/// Each probe runs on its own task so a panicking probe is recorded as dead
/// rather than tearing down the cycle.
#[derive(Debug, Default)]
pub struct SerialPingStrategy;

impl PingStrategy for SerialPingStrategy {
    fn ping_servers(&self, ping: Arc<dyn Ping>, servers: Vec<Arc<Server>>) -> PingResultsFuture {
        Box::pin(async move {
            let mut results = Vec::with_capacity(servers.len());
            for server in servers {
                let ping = ping.clone();
                let handle = tokio::spawn(async move { ping.is_alive(server).await });
                results.push(handle.await.unwrap_or_else(|err| {
                    warn!(error = %err, "ping probe crashed, treating server as dead");
                    false
                }));
            }
            results
        })
    }
}

/// Probes every server concurrently and joins the results in order.
#[derive(Debug, Default)]
pub struct ParallelPingStrategy;

impl PingStrategy for ParallelPingStrategy {
    fn ping_servers(&self, ping: Arc<dyn Ping>, servers: Vec<Arc<Server>>) -> PingResultsFuture {
        Box::pin(async move {
            let handles: Vec<_> = servers
                .into_iter()
                .map(|server| {
                    let ping = ping.clone();
                    tokio::spawn(async move { ping.is_alive(server).await })
                })
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await.unwrap_or_else(|err| {
                    warn!(error = %err, "ping probe crashed, treating server as dead");
                    false
                }));
            }
            results
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::PingFuture;

    /// Alive iff the port is even; panics on port 500 to exercise isolation.
    struct PortParityPing;

    impl Ping for PortParityPing {
        fn is_alive(&self, server: Arc<Server>) -> PingFuture<'_> {
            Box::pin(async move {
                if server.port() == 500 {
                    panic!("probe exploded");
                }
                server.port() % 2 == 0
            })
        }
    }

    fn servers(ports: &[u16]) -> Vec<Arc<Server>> {
        ports
            .iter()
            .map(|p| Arc::new(Server::new("http", "host", *p)))
            .collect()
    }

    #[tokio::test]
    async fn parallel_results_keep_input_order() {
        let strategy = ParallelPingStrategy;
        let results = strategy
            .ping_servers(Arc::new(PortParityPing), servers(&[80, 81, 82, 83]))
            .await;
        assert_eq!(results, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn serial_results_keep_input_order() {
        let strategy = SerialPingStrategy;
        let results = strategy
            .ping_servers(Arc::new(PortParityPing), servers(&[81, 80]))
            .await;
        assert_eq!(results, vec![false, true]);
    }

    #[tokio::test]
    async fn panicking_probe_counts_as_dead() {
        let strategy = ParallelPingStrategy;
        let results = strategy
            .ping_servers(Arc::new(PortParityPing), servers(&[80, 500, 82]))
            .await;
        assert_eq!(results, vec![true, false, true]);
    }

    #[tokio::test]
    async fn empty_list_yields_empty_results() {
        let strategy = ParallelPingStrategy;
        let results = strategy.ping_servers(Arc::new(PortParityPing), vec![]).await;
        assert!(results.is_empty());
    }
}
