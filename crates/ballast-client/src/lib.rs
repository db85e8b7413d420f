//! ballast-client — execution layer that drives requests through a
//! load balancer.
//!
//! A [`LoadBalancerCommand`] runs one call: it asks the balancer for a
//! server, wraps every attempt in the stats bookkeeping that feeds the
//! circuit breaker, and retries within the [`RetryHandler`] budgets,
//! first against the failing server, then by rotating to fresh ones.
//! [`LoadBalancerClient`] packages that engine behind a [`Transport`]
//! so protocol code only supplies the actual I/O.
//!
//! ```text
//! LoadBalancerClient
//!   ├── AdmissionChain (pre-flight rejection)
//!   ├── LoadBalancerCommand
//!   │     ├── LoadBalancerContext (selection, URI rewriting, stats)
//!   │     ├── ExecutionContext (attempt counters)
//!   │     └── RetryHandler (what retries, what trips the breaker)
//!   ├── Transport (protocol I/O)
//!   └── HookChain (attempt observers)
//! ```

pub mod admission;
pub mod client;
pub mod command;
pub mod context;
pub mod execution;
pub mod hooks;
pub mod retry;
pub mod transport;

pub use admission::{AdmissionChain, AdmissionControl, MaxActiveRequests};
pub use client::LoadBalancerClient;
pub use command::LoadBalancerCommand;
pub use context::LoadBalancerContext;
pub use execution::{ExecutionContext, ExecutionInfo};
pub use hooks::{CompletionHook, CompletionInfo, HookChain};
pub use retry::{DefaultRetryHandler, HttpRetryHandler, RetryHandler};
pub use transport::{Request, Response, Transport, TransportFuture};
