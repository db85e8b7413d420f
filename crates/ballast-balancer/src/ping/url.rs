//! HTTP liveness probe.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::debug;

use ballast_core::Server;

use super::{Ping, PingFuture};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes a server with `GET <path>` over plain HTTP/1.1.
///
/// A server is alive when the response is 2xx; with an expected body
/// configured, the body must also contain it. The probe always speaks
/// plaintext, so point it at a plaintext health port for TLS-only backends.
pub struct UrlPing {
    path: String,
    expected_content: Option<String>,
    timeout: Duration,
}

impl UrlPing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request path, starting with `/`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Require the response body to contain this string.
    pub fn with_expected_content(mut self, content: impl Into<String>) -> Self {
        self.expected_content = Some(content.into());
        self
    }

    /// Overall deadline for connect, request, and body read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn probe(&self, address: &str, uri: &str) -> bool {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "ping connection failed");
                return false;
            }
        };

        let io = TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "ping handshake failed");
                return false;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = http::Request::builder()
            .method("GET")
            .uri(uri)
            .header("host", address)
            .header("user-agent", "ballast/0.1")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = match sender.send_request(request).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, %uri, "ping request failed");
                return false;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), %uri, "ping non-2xx");
            return false;
        }

        let Some(expected) = &self.expected_content else {
            return true;
        };
        match response.into_body().collect().await {
            Ok(collected) => {
                let body = String::from_utf8_lossy(&collected.to_bytes()).into_owned();
                body.contains(expected.as_str())
            }
            Err(e) => {
                debug!(error = %e, %uri, "ping body read failed");
                false
            }
        }
    }
}

impl Default for UrlPing {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            expected_content: None,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl Ping for UrlPing {
    fn is_alive(&self, server: Arc<Server>) -> PingFuture<'_> {
        Box::pin(async move {
            let address = server.host_port();
            let uri = format!("http://{address}{}", self.path);
            match tokio::time::timeout(self.timeout, self.probe(&address, &uri)).await {
                Ok(alive) => alive,
                Err(_) => {
                    debug!(%uri, "ping timed out");
                    false
                }
            }
        })
    }
}
