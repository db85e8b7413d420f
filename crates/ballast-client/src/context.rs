//! Shared state for one named client: its balancer, its retry policy,
//! and the stats bookkeeping every attempt flows through.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use tracing::warn;

use ballast_balancer::LoadBalancer;
use ballast_core::{ClientConfig, ClientError, ClientResult, ErrorKind, Server};
use ballast_stats::ServerStats;

use crate::retry::{DefaultRetryHandler, RetryHandler};

/// Ties a client name to its balancer and default retry policy.
///
/// The command engine leans on this for server selection, URI rewriting,
/// and the per-attempt stats updates that drive the circuit breaker.
pub struct LoadBalancerContext {
    client_name: String,
    load_balancer: Arc<dyn LoadBalancer>,
    retry_handler: Arc<dyn RetryHandler>,
}

impl LoadBalancerContext {
    pub fn new(config: &ClientConfig, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            client_name: config.client_name().to_string(),
            load_balancer,
            retry_handler: Arc::new(DefaultRetryHandler::new(config)),
        }
    }

    /// Replaces the default retry policy.
    pub fn with_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = handler;
        self
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn retry_handler(&self) -> &Arc<dyn RetryHandler> {
        &self.retry_handler
    }

    /// Stats entry for one server, created on first sight.
    pub fn server_stats(&self, server: &Arc<Server>) -> Arc<ServerStats> {
        self.load_balancer.load_balancer_stats().server_stats(server)
    }

    /// Resolves the server a request should go to.
    ///
    /// A URI without a host defers to the balancer; when it names a host
    /// the balancer is bypassed and the request goes exactly there, with
    /// scheme and port defaulted for secure versus plain targets.
    pub fn server_for_request(
        &self,
        uri: Option<&Uri>,
        key: Option<&str>,
    ) -> ClientResult<Arc<Server>> {
        let host = uri.and_then(Uri::host).unwrap_or("");
        if host.is_empty() {
            return self.load_balancer.choose_server(key).ok_or_else(|| {
                ClientError::new(
                    ErrorKind::General,
                    format!(
                        "load balancer has no available server for client {}",
                        self.client_name
                    ),
                )
            });
        }

        let (scheme, port) = match uri {
            Some(uri) => scheme_and_port(uri),
            None => ("http".to_string(), 80),
        };
        Ok(Arc::new(Server::new(scheme, host, port)))
    }

    /// Rewrites a request URI so its authority points at `server`.
    ///
    /// User info, path, and query come through verbatim; the original URI
    /// is returned untouched when it already points at the server.
    pub fn reconstruct_uri_with_server(
        &self,
        server: &Arc<Server>,
        original: &Uri,
    ) -> ClientResult<Uri> {
        let authority = server.host_port();
        if original.scheme_str() == Some(server.scheme())
            && original.authority().map(|a| a.as_str()) == Some(authority.as_str())
        {
            return Ok(original.clone());
        }

        let scheme = if server.scheme().is_empty() {
            original.scheme_str().unwrap_or("http")
        } else {
            server.scheme()
        };

        let mut target = String::new();
        target.push_str(scheme);
        target.push_str("://");
        if let Some(original_authority) = original.authority() {
            let raw = original_authority.as_str();
            if let Some(at) = raw.rfind('@') {
                target.push_str(&raw[..=at]);
            }
        }
        target.push_str(&authority);
        if let Some(path_and_query) = original.path_and_query() {
            target.push_str(path_and_query.as_str());
        }

        target.parse::<Uri>().map_err(|source| {
            ClientError::with_source(
                ErrorKind::General,
                format!("rewritten URI {target} is not valid"),
                source,
            )
        })
    }

    /// Marks an attempt as in flight on the server's gauges.
    pub fn note_open_connection(&self, stats: &Arc<ServerStats>) {
        stats.increment_open_connections();
        stats.increment_active_requests();
    }

    /// Settles an attempt: closes the in-flight gauges, records the
    /// response time, and feeds the circuit breaker. A tripping failure
    /// that crosses the breaker threshold sidelines the server; anything
    /// else returns it to rotation.
    pub fn note_request_completion(
        &self,
        stats: &Arc<ServerStats>,
        error: Option<&ClientError>,
        elapsed: Duration,
        handler: &dyn RetryHandler,
    ) {
        stats.decrement_open_connections();
        stats.decrement_active_requests();
        stats.increment_num_requests();
        stats.note_response_time(elapsed.as_secs_f64() * 1000.0);

        match error {
            Some(error) if handler.is_circuit_tripping(error) => {
                stats.increment_successive_connection_failures();
                stats.add_to_failure_count();
                if stats.is_circuit_breaker_tripped() {
                    self.load_balancer.mark_server_temp_down(stats.server());
                    warn!(
                        name = %self.client_name,
                        server = %stats.server(),
                        "circuit breaker tripped, server sidelined",
                    );
                }
            }
            _ => {
                stats.clear_successive_connection_failures();
                self.load_balancer.mark_server_ready(stats.server());
            }
        }
    }
}

fn scheme_and_port(uri: &Uri) -> (String, u16) {
    let scheme = uri.scheme_str().unwrap_or("");
    let secure = scheme.contains("https");
    let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
    if scheme.is_empty() {
        ("http".to_string(), port)
    } else {
        (scheme.to_string(), port)
    }
}
