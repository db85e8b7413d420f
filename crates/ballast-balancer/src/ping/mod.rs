//! Server liveness probes.

mod strategy;
mod url;

pub use strategy::{ParallelPingStrategy, PingStrategy, SerialPingStrategy};
pub use url::UrlPing;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ballast_core::Server;

/// Boxed future returned by [`Ping::is_alive`].
pub type PingFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// A liveness probe against one server.
///
/// Probes take the server by value so strategies can fan them out onto
/// spawned tasks. A probe that panics counts as a failed check, not a
/// crashed cycle.
pub trait Ping: Send + Sync {
    fn is_alive(&self, server: Arc<Server>) -> PingFuture<'_>;
}

/// Considers every server alive. Useful for registries whose liveness is
/// managed externally.
#[derive(Debug, Default)]
pub struct NoOpPing;

impl Ping for NoOpPing {
    fn is_alive(&self, _server: Arc<Server>) -> PingFuture<'_> {
        Box::pin(async { true })
    }
}
