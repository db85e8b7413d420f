//! Retry-driving executor for one balanced call.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use http::Uri;
use tracing::{debug, warn};

use ballast_core::{ClientError, ClientResult, ErrorKind, Server};

use crate::context::LoadBalancerContext;
use crate::execution::ExecutionContext;
use crate::retry::RetryHandler;

/// Runs an operation against balancer-chosen servers, retrying on the
/// same server and rotating to fresh ones within the policy's budgets.
///
/// The operation is an async closure taking the target server; the
/// command wraps every attempt in the stats bookkeeping that feeds the
/// circuit breaker.
pub struct LoadBalancerCommand {
    context: Arc<LoadBalancerContext>,
    retry_handler: Option<Arc<dyn RetryHandler>>,
    uri: Option<Uri>,
    key: Option<String>,
    server: Option<Arc<Server>>,
}

impl LoadBalancerCommand {
    pub fn new(context: Arc<LoadBalancerContext>) -> Self {
        Self {
            context,
            retry_handler: None,
            uri: None,
            key: None,
            server: None,
        }
    }

    /// Overrides the context's retry policy for this call.
    pub fn with_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = Some(handler);
        self
    }

    /// Request URI consulted during server resolution. A URI that names
    /// a host bypasses the balancer.
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = Some(uri);
        self
    }

    /// Affinity token for key-aware selection rules.
    pub fn with_server_locator(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Pins every attempt to one server. Next-server rotation is
    /// disabled for pinned calls.
    pub fn with_server(mut self, server: Arc<Server>) -> Self {
        self.server = Some(server);
        self
    }

    fn effective_handler(&self) -> Arc<dyn RetryHandler> {
        self.retry_handler
            .clone()
            .unwrap_or_else(|| self.context.retry_handler().clone())
    }

    fn select_server(&self) -> ClientResult<Arc<Server>> {
        if let Some(server) = &self.server {
            return Ok(server.clone());
        }
        self.context
            .server_for_request(self.uri.as_ref(), self.key.as_deref())
    }

    /// Runs the operation to completion, retrying per the policy.
    ///
    /// On exhaustion the last failure is wrapped: a spent same-server
    /// budget surfaces [`ErrorKind::NumberOfRetriesExceeded`], a spent
    /// rotation budget [`ErrorKind::NumberOfRetriesNextServerExceeded`].
    /// Failures the policy declines to retry come back unwrapped.
    pub async fn execute<R, F, Fut>(&self, mut operation: F) -> ClientResult<R>
    where
        F: FnMut(Arc<Server>) -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        let handler = self.effective_handler();
        let max_same = handler.max_retries_on_same_server();
        let max_next = handler.max_retries_on_next_server();

        let mut exec = ExecutionContext::new();
        let mut server = self.select_server()?;
        exec.set_server(server.clone());

        let mut error = match self
            .attempt(&mut exec, &server, handler.as_ref(), &mut operation)
            .await
        {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if max_same > 0 {
            while retry_allowed(handler.as_ref(), &error, exec.attempts(), max_same, true) {
                error = match self
                    .attempt(&mut exec, &server, handler.as_ref(), &mut operation)
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                };
            }
            if max_next == 0 && exec.attempts() == max_same + 1 {
                let info = exec.to_final_execution_info();
                warn!(
                    name = %self.context.client_name(),
                    server = %server,
                    attempts = info.past_attempts_on_server,
                    "same-server retries exhausted",
                );
                return Err(ClientError::wrap(ErrorKind::NumberOfRetriesExceeded, error));
            }
        }

        if max_next > 0 && self.server.is_none() {
            while retry_allowed(handler.as_ref(), &error, exec.server_attempts(), max_next, false)
            {
                server = self.select_server()?;
                exec.set_server(server.clone());
                debug!(
                    name = %self.context.client_name(),
                    server = %server,
                    "rotating to next server",
                );
                error = match self
                    .attempt(&mut exec, &server, handler.as_ref(), &mut operation)
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                };
            }
            if exec.server_attempts() == max_next + 1 {
                let info = exec.to_final_execution_info();
                warn!(
                    name = %self.context.client_name(),
                    servers_tried = info.past_servers_attempted + 1,
                    "next-server retries exhausted",
                );
                return Err(ClientError::wrap(
                    ErrorKind::NumberOfRetriesNextServerExceeded,
                    error,
                ));
            }
        }

        Err(error)
    }

    async fn attempt<R, F, Fut>(
        &self,
        exec: &mut ExecutionContext,
        server: &Arc<Server>,
        handler: &dyn RetryHandler,
        operation: &mut F,
    ) -> ClientResult<R>
    where
        F: FnMut(Arc<Server>) -> Fut,
        Fut: Future<Output = ClientResult<R>>,
    {
        exec.increment_attempts();
        let stats = self.context.server_stats(server);
        self.context.note_open_connection(&stats);
        let started = Instant::now();
        let outcome = operation(server.clone()).await;
        self.context
            .note_request_completion(&stats, outcome.as_ref().err(), started.elapsed(), handler);
        outcome
    }
}

/// Retry gate shared by both loops. Aborts never retry, a spent budget
/// never retries, anything else defers to the policy.
fn retry_allowed(
    handler: &dyn RetryHandler,
    error: &ClientError,
    try_count: usize,
    max_retries: usize,
    same_server: bool,
) -> bool {
    if error.is(ErrorKind::AbortExecution) {
        return false;
    }
    if try_count > max_retries {
        return false;
    }
    handler.is_retriable(error, same_server)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ballast_balancer::rules::RoundRobinRule;
    use ballast_balancer::{BaseLoadBalancer, LoadBalancer};
    use ballast_core::ClientConfig;
    use ballast_core::config::keys;
    use ballast_core::server::parse_server_list;

    fn engine(
        servers: &str,
        same: i32,
        next: i32,
        enabled: bool,
    ) -> (LoadBalancerCommand, Arc<dyn LoadBalancer>) {
        let mut config = ClientConfig::new("command-test");
        config.set_property(keys::MAX_RETRIES_SAME_SERVER, same);
        config.set_property(keys::MAX_RETRIES_NEXT_SERVER, next);
        config.set_property(keys::RETRY_ON_ALL_OPERATIONS, enabled);
        engine_with_config(config, servers)
    }

    fn engine_with_config(
        config: ClientConfig,
        servers: &str,
    ) -> (LoadBalancerCommand, Arc<dyn LoadBalancer>) {
        let lb = BaseLoadBalancer::new(&config, Arc::new(RoundRobinRule::new()), None);
        if !servers.is_empty() {
            lb.set_server_list(parse_server_list(servers).unwrap());
        }
        let lb: Arc<dyn LoadBalancer> = lb;
        let context = Arc::new(LoadBalancerContext::new(&config, lb.clone()));
        (LoadBalancerCommand::new(context), lb)
    }

    #[tokio::test]
    async fn success_on_the_first_attempt_needs_no_retries() {
        let (command, _lb) = engine("a:80", 0, 0, false);
        let calls = AtomicUsize::new(0);

        let outcome = command
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("done") }
            })
            .await;

        assert_eq!(outcome.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_server_budget_allows_n_plus_one_attempts() {
        let (command, _lb) = engine("a:80,b:80", 2, 0, true);
        let hosts = Mutex::new(Vec::new());

        let outcome: ClientResult<()> = command
            .execute(|server| {
                hosts.lock().unwrap().push(server.host_port());
                async { Err(ClientError::new(ErrorKind::ConnectError, "refused")) }
            })
            .await;

        let error = outcome.unwrap_err();
        assert!(error.is(ErrorKind::NumberOfRetriesExceeded));

        let hosts = hosts.into_inner().unwrap();
        assert_eq!(hosts.len(), 3);
        let distinct: HashSet<_> = hosts.iter().collect();
        assert_eq!(distinct.len(), 1);
    }

    #[tokio::test]
    async fn aborts_stop_after_a_single_attempt() {
        let (command, _lb) = engine("a:80,b:80", 3, 3, true);
        let calls = AtomicUsize::new(0);

        let outcome: ClientResult<()> = command
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::new(ErrorKind::AbortExecution, "caller gave up")) }
            })
            .await;

        assert!(outcome.unwrap_err().is(ErrorKind::AbortExecution));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retriable_failures_come_back_unwrapped() {
        let (command, _lb) = engine("a:80", 2, 0, true);
        let calls = AtomicUsize::new(0);

        let outcome: ClientResult<()> = command
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::new(ErrorKind::SocketError, "broken pipe")) }
            })
            .await;

        assert!(outcome.unwrap_err().is(ErrorKind::SocketError));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotation_covers_m_plus_one_distinct_servers() {
        let (command, _lb) = engine("a:80,b:80,c:80", 0, 2, true);
        let hosts = Mutex::new(Vec::new());

        let outcome: ClientResult<()> = command
            .execute(|server| {
                hosts.lock().unwrap().push(server.host_port());
                async { Err(ClientError::new(ErrorKind::ConnectError, "refused")) }
            })
            .await;

        let error = outcome.unwrap_err();
        assert!(error.is(ErrorKind::NumberOfRetriesNextServerExceeded));

        let hosts = hosts.into_inner().unwrap();
        assert_eq!(hosts.len(), 3);
        let distinct: HashSet<_> = hosts.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[tokio::test]
    async fn rotation_stops_at_the_first_success() {
        let (command, _lb) = engine("a:80,b:80", 0, 1, true);
        let calls = AtomicUsize::new(0);

        let outcome = command
            .execute(|_server| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ClientError::new(ErrorKind::ConnectError, "refused"))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(outcome.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pinned_calls_never_rotate() {
        let (command, lb) = engine("a:80,b:80", 0, 2, true);
        let pinned = lb.all_servers().remove(0);
        let command = command.with_server(pinned.clone());
        let hosts = Mutex::new(Vec::new());

        let outcome: ClientResult<()> = command
            .execute(|server| {
                hosts.lock().unwrap().push(server.host_port());
                async { Err(ClientError::new(ErrorKind::ConnectError, "refused")) }
            })
            .await;

        assert!(outcome.unwrap_err().is(ErrorKind::ConnectError));
        assert_eq!(hosts.into_inner().unwrap(), vec![pinned.host_port()]);
    }

    #[tokio::test]
    async fn a_tripped_circuit_cuts_rotation_short() {
        let mut config = ClientConfig::new("command-test");
        config.set_property(keys::MAX_RETRIES_SAME_SERVER, 0);
        config.set_property(keys::MAX_RETRIES_NEXT_SERVER, 3);
        config.set_property(keys::RETRY_ON_ALL_OPERATIONS, true);
        config.set_property(keys::CONNECTION_FAILURE_THRESHOLD, 2);
        let (command, lb) = engine_with_config(config, "a:80");
        let calls = AtomicUsize::new(0);

        let outcome: ClientResult<()> = command
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::new(ErrorKind::SocketTimeout, "no answer")) }
            })
            .await;

        // Two timeouts trip the only server; the next rotation finds an
        // empty pool and selection fails.
        let error = outcome.unwrap_err();
        assert!(error.is(ErrorKind::General));
        assert!(error.message().contains("command-test"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(lb.all_servers().remove(0).is_temp_down());
    }

    #[tokio::test]
    async fn attempts_settle_the_server_gauges() {
        let (command, lb) = engine("a:80", 1, 0, true);
        let calls = AtomicUsize::new(0);

        let outcome = command
            .execute(|_server| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(ClientError::new(ErrorKind::ConnectError, "refused"))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;
        assert!(outcome.is_ok());

        let server = lb.all_servers().remove(0);
        let stats = lb.load_balancer_stats().server_stats(&server);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.open_connections(), 0);
        assert_eq!(stats.active_requests(), 0);
        assert_eq!(stats.successive_connection_failures(), 0);
    }

    #[tokio::test]
    async fn an_empty_pool_fails_before_the_first_attempt() {
        let (command, _lb) = engine("", 0, 1, true);
        let calls = AtomicUsize::new(0);

        let outcome: ClientResult<()> = command
            .execute(|_server| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::new(ErrorKind::ConnectError, "refused")) }
            })
            .await;

        assert!(outcome.unwrap_err().is(ErrorKind::General));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
