//! Completion hooks observing every attempt the client makes.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;

use ballast_core::{ErrorKind, Server};

/// What one attempt did, as seen by the client.
#[derive(Debug)]
pub struct CompletionInfo<'a> {
    pub server: &'a Arc<Server>,
    pub uri: &'a Uri,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub elapsed: Duration,
}

/// Observes settled attempts. Metrics emission hangs off this seam;
/// hooks run inline on the request path and should stay cheap.
pub trait CompletionHook: Send + Sync {
    fn on_completion(&self, info: &CompletionInfo<'_>);
}

/// Fan-out to every registered hook, in registration order.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn CompletionHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl CompletionHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn notify(&self, info: &CompletionInfo<'_>) {
        for hook in &self.hooks {
            hook.on_completion(info);
        }
    }
}
