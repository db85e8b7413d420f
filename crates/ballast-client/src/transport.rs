//! Protocol seam between the retry engine and actual I/O.
//!
//! The engine never performs network calls itself. It hands a rewritten
//! request to a [`Transport`] and classifies whatever comes back. Any
//! protocol can sit behind this seam as long as its requests can be
//! re-aimed at a different URI.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{HeaderMap, Uri};

use ballast_core::{ClientConfig, ClientResult};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a, R> = Pin<Box<dyn Future<Output = ClientResult<R>> + Send + 'a>>;

/// An outgoing request the engine can clone and re-aim.
pub trait Request: Clone + Send + Sync {
    /// Target URI. May omit the authority entirely, in which case the
    /// balancer picks the host.
    fn uri(&self) -> &Uri;

    /// Opaque affinity token handed to key-aware selection rules.
    fn load_balancer_key(&self) -> Option<&str>;

    /// The same request pointed at a different URI.
    fn with_uri(&self, uri: Uri) -> Self;
}

/// The answer a transport produced for one attempt.
pub trait Response: Send + Sync {
    /// Whether the attempt counts as a success at the protocol level.
    fn is_success(&self) -> bool;

    /// The URI the attempt was sent to.
    fn requested_uri(&self) -> &Uri;

    fn headers(&self) -> &HeaderMap;

    /// Response body, when the transport read one.
    fn payload(&self) -> Option<&Bytes>;
}

/// Performs the actual I/O for one protocol.
///
/// Implementations map their native failures into [`ClientError`]
/// kinds, usually through a [`ClassifierChain`], so the retry handlers
/// can tell a refused connection from a served error page.
///
/// [`ClientError`]: ballast_core::ClientError
/// [`ClassifierChain`]: ballast_core::ClassifierChain
pub trait Transport: Send + Sync {
    type Request: Request;
    type Response: Response;

    fn execute<'a>(
        &'a self,
        request: Self::Request,
        config: &'a ClientConfig,
    ) -> TransportFuture<'a, Self::Response>;
}
