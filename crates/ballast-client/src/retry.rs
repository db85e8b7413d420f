//! Retry policy: which failures earn another attempt, and which ones
//! count against a server's circuit breaker.

use ballast_core::config::{defaults, keys};
use ballast_core::{ClientConfig, ClientError, ErrorKind};

/// Classifies failures for the retry engine.
///
/// `same_server` distinguishes re-attempting the server that just failed
/// from rotating to a fresh one; policies are usually stricter about the
/// former.
pub trait RetryHandler: Send + Sync {
    /// Whether this failure is worth another attempt.
    fn is_retriable(&self, error: &ClientError, same_server: bool) -> bool;

    /// Whether this failure counts toward tripping the server's circuit
    /// breaker.
    fn is_circuit_tripping(&self, error: &ClientError) -> bool;

    /// Retry budget against the server that failed.
    fn max_retries_on_same_server(&self) -> usize;

    /// Retry budget across fresh servers.
    fn max_retries_on_next_server(&self) -> usize;
}

/// Stock policy.
///
/// With retries enabled, connect errors and socket timeouts are retried
/// on the same server and anything is retried on the next one. Socket
/// timeouts and socket errors feed the circuit breaker either way.
#[derive(Debug, Clone)]
pub struct DefaultRetryHandler {
    retry_enabled: bool,
    max_same_server: usize,
    max_next_server: usize,
}

impl DefaultRetryHandler {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            retry_enabled: config
                .get_bool(keys::RETRY_ON_ALL_OPERATIONS, defaults::RETRY_ON_ALL_OPERATIONS),
            max_same_server: config
                .get_int(keys::MAX_RETRIES_SAME_SERVER, defaults::MAX_RETRIES_SAME_SERVER)
                .max(0) as usize,
            max_next_server: config
                .get_int(keys::MAX_RETRIES_NEXT_SERVER, defaults::MAX_RETRIES_NEXT_SERVER)
                .max(0) as usize,
        }
    }

    /// Policy with explicit limits, bypassing configuration.
    pub fn with_limits(retry_enabled: bool, max_same_server: usize, max_next_server: usize) -> Self {
        Self {
            retry_enabled,
            max_same_server,
            max_next_server,
        }
    }
}

impl Default for DefaultRetryHandler {
    fn default() -> Self {
        Self {
            retry_enabled: defaults::RETRY_ON_ALL_OPERATIONS,
            max_same_server: defaults::MAX_RETRIES_SAME_SERVER.max(0) as usize,
            max_next_server: defaults::MAX_RETRIES_NEXT_SERVER.max(0) as usize,
        }
    }
}

impl RetryHandler for DefaultRetryHandler {
    fn is_retriable(&self, error: &ClientError, same_server: bool) -> bool {
        if !self.retry_enabled {
            return false;
        }
        if same_server {
            matches!(error.kind(), ErrorKind::SocketTimeout | ErrorKind::ConnectError)
        } else {
            true
        }
    }

    fn is_circuit_tripping(&self, error: &ClientError) -> bool {
        matches!(error.kind(), ErrorKind::SocketTimeout | ErrorKind::SocketError)
    }

    fn max_retries_on_same_server(&self) -> usize {
        self.max_same_server
    }

    fn max_retries_on_next_server(&self) -> usize {
        self.max_next_server
    }
}

/// HTTP-flavored policy.
///
/// Server-side throttling additionally trips the circuit breaker, and is
/// retried only against a different server: hammering the server that
/// just shed load defeats the point of shedding it.
#[derive(Debug, Clone, Default)]
pub struct HttpRetryHandler {
    inner: DefaultRetryHandler,
}

impl HttpRetryHandler {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            inner: DefaultRetryHandler::new(config),
        }
    }
}

impl RetryHandler for HttpRetryHandler {
    fn is_retriable(&self, error: &ClientError, same_server: bool) -> bool {
        if error.is(ErrorKind::ServerThrottled) {
            return !same_server && self.inner.retry_enabled;
        }
        self.inner.is_retriable(error, same_server)
    }

    fn is_circuit_tripping(&self, error: &ClientError) -> bool {
        error.is(ErrorKind::ServerThrottled) || self.inner.is_circuit_tripping(error)
    }

    fn max_retries_on_same_server(&self) -> usize {
        self.inner.max_retries_on_same_server()
    }

    fn max_retries_on_next_server(&self) -> usize {
        self.inner.max_retries_on_next_server()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> ClientError {
        ClientError::new(kind, "test failure")
    }

    #[test]
    fn defaults_leave_retries_disabled() {
        let handler = DefaultRetryHandler::default();
        assert_eq!(handler.max_retries_on_same_server(), 0);
        assert_eq!(handler.max_retries_on_next_server(), 1);
        assert!(!handler.is_retriable(&err(ErrorKind::ConnectError), true));
        assert!(!handler.is_retriable(&err(ErrorKind::ConnectError), false));
    }

    #[test]
    fn enabled_retries_cover_connect_failures_on_the_same_server() {
        let handler = DefaultRetryHandler::with_limits(true, 1, 1);
        assert!(handler.is_retriable(&err(ErrorKind::ConnectError), true));
        assert!(handler.is_retriable(&err(ErrorKind::SocketTimeout), true));
        assert!(!handler.is_retriable(&err(ErrorKind::SocketError), true));
        assert!(!handler.is_retriable(&err(ErrorKind::General), true));
    }

    #[test]
    fn any_failure_can_rotate_when_enabled() {
        let handler = DefaultRetryHandler::with_limits(true, 1, 1);
        assert!(handler.is_retriable(&err(ErrorKind::General), false));
        assert!(handler.is_retriable(&err(ErrorKind::SocketError), false));
    }

    #[test]
    fn socket_failures_trip_the_circuit() {
        let handler = DefaultRetryHandler::default();
        assert!(handler.is_circuit_tripping(&err(ErrorKind::SocketTimeout)));
        assert!(handler.is_circuit_tripping(&err(ErrorKind::SocketError)));
        assert!(!handler.is_circuit_tripping(&err(ErrorKind::ConnectError)));
        assert!(!handler.is_circuit_tripping(&err(ErrorKind::ServerThrottled)));
    }

    #[test]
    fn throttling_trips_the_http_circuit() {
        let handler = HttpRetryHandler::default();
        assert!(handler.is_circuit_tripping(&err(ErrorKind::ServerThrottled)));
        assert!(handler.is_circuit_tripping(&err(ErrorKind::SocketError)));
        assert!(!handler.is_circuit_tripping(&err(ErrorKind::ConnectError)));
    }

    #[test]
    fn throttled_requests_only_rotate() {
        let handler = HttpRetryHandler {
            inner: DefaultRetryHandler::with_limits(true, 2, 2),
        };
        assert!(!handler.is_retriable(&err(ErrorKind::ServerThrottled), true));
        assert!(handler.is_retriable(&err(ErrorKind::ServerThrottled), false));

        let disabled = HttpRetryHandler::default();
        assert!(!disabled.is_retriable(&err(ErrorKind::ServerThrottled), false));
    }

    #[test]
    fn limits_come_from_config() {
        let mut config = ClientConfig::new("retry-test");
        config.set_property(keys::RETRY_ON_ALL_OPERATIONS, true);
        config.set_property(keys::MAX_RETRIES_SAME_SERVER, 2);
        config.set_property(keys::MAX_RETRIES_NEXT_SERVER, 3);

        let handler = DefaultRetryHandler::new(&config);
        assert_eq!(handler.max_retries_on_same_server(), 2);
        assert_eq!(handler.max_retries_on_next_server(), 3);
        assert!(handler.is_retriable(&err(ErrorKind::General), false));
    }
}
