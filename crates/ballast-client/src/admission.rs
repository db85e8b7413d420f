//! Admission control consulted before each attempt leaves the client.

use http::Uri;

use ballast_core::ClientConfig;
use ballast_stats::ServerStats;

/// Decides whether an attempt may proceed against a server.
///
/// Implementations see the request URI and the target's live stats, so
/// budgets can key off the endpoint, the server's in-flight load, or
/// both. Rejected attempts surface as client-throttled failures without
/// touching the network.
pub trait AdmissionControl: Send + Sync {
    fn allow(&self, uri: &Uri, stats: &ServerStats, config: &ClientConfig) -> bool;
}

/// Conjunction of admission predicates. An empty chain admits everything.
#[derive(Default)]
pub struct AdmissionChain {
    controls: Vec<Box<dyn AdmissionControl>>,
}

impl AdmissionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, control: impl AdmissionControl + 'static) -> Self {
        self.controls.push(Box::new(control));
        self
    }

    pub fn allow(&self, uri: &Uri, stats: &ServerStats, config: &ClientConfig) -> bool {
        self.controls
            .iter()
            .all(|control| control.allow(uri, stats, config))
    }
}

/// Caps how many attempts may be in flight against one server.
pub struct MaxActiveRequests {
    limit: i64,
}

impl MaxActiveRequests {
    pub fn new(limit: i64) -> Self {
        Self { limit }
    }
}

impl AdmissionControl for MaxActiveRequests {
    fn allow(&self, _uri: &Uri, stats: &ServerStats, _config: &ClientConfig) -> bool {
        stats.active_requests() < self.limit
    }
}
