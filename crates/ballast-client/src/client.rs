//! Balancer-aware client facade.

use std::sync::Arc;
use std::time::Instant;

use ballast_balancer::LoadBalancer;
use ballast_core::{ClientConfig, ClientError, ClientResult, ErrorKind};

use crate::admission::AdmissionChain;
use crate::command::LoadBalancerCommand;
use crate::context::LoadBalancerContext;
use crate::hooks::{CompletionInfo, HookChain};
use crate::retry::{HttpRetryHandler, RetryHandler};
use crate::transport::{Request, Response, Transport};

/// Wires a [`Transport`] to a load balancer.
///
/// Each call resolves a server, rewrites the request URI to point at
/// it, and runs the transport under the retry engine. Admission
/// predicates can reject an attempt before it touches the network, and
/// completion hooks see every attempt that settles.
pub struct LoadBalancerClient<T: Transport> {
    context: Arc<LoadBalancerContext>,
    transport: T,
    config: ClientConfig,
    retry_handler: Arc<dyn RetryHandler>,
    admission: AdmissionChain,
    hooks: HookChain,
}

impl<T: Transport> LoadBalancerClient<T> {
    pub fn new(config: ClientConfig, transport: T, load_balancer: Arc<dyn LoadBalancer>) -> Self {
        let context = Arc::new(LoadBalancerContext::new(&config, load_balancer));
        let retry_handler: Arc<dyn RetryHandler> = Arc::new(HttpRetryHandler::new(&config));
        Self {
            context,
            transport,
            config,
            retry_handler,
            admission: AdmissionChain::new(),
            hooks: HookChain::new(),
        }
    }

    /// Replaces the HTTP-flavored default retry policy.
    pub fn with_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = handler;
        self
    }

    pub fn with_admission(mut self, admission: AdmissionChain) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn context(&self) -> &Arc<LoadBalancerContext> {
        &self.context
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Executes a request against a balancer-chosen server.
    ///
    /// The request URI may omit its authority; whatever it carries is
    /// rewritten so the authority names the chosen server. A URI that
    /// already names a host bypasses selection and goes exactly there.
    pub async fn execute_with_load_balancer(&self, request: T::Request) -> ClientResult<T::Response> {
        let mut command = LoadBalancerCommand::new(self.context.clone())
            .with_uri(request.uri().clone())
            .with_retry_handler(self.retry_handler.clone());
        if let Some(key) = request.load_balancer_key() {
            command = command.with_server_locator(key);
        }

        command
            .execute(|server| {
                let request = request.clone();
                async move {
                    let stats = self.context.server_stats(&server);
                    if !self.admission.allow(request.uri(), &stats, &self.config) {
                        return Err(ClientError::new(
                            ErrorKind::ClientThrottled,
                            format!(
                                "admission control rejected the request for client {}",
                                self.context.client_name()
                            ),
                        ));
                    }

                    let target = self.context.reconstruct_uri_with_server(&server, request.uri())?;
                    let request = request.with_uri(target.clone());

                    let started = Instant::now();
                    let outcome = self.transport.execute(request, &self.config).await;
                    let info = CompletionInfo {
                        server: &server,
                        uri: &target,
                        success: outcome.as_ref().map(Response::is_success).unwrap_or(false),
                        error_kind: outcome.as_ref().err().map(ClientError::kind),
                        elapsed: started.elapsed(),
                    };
                    self.hooks.notify(&info);
                    outcome
                }
            })
            .await
    }
}
