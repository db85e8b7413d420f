//! ballast-core — server model, client configuration, and error taxonomy.
//!
//! Everything in this crate is protocol-agnostic: a [`Server`] is an
//! addressable endpoint, a [`ClientConfig`] is a typed property bag for one
//! named client, and a [`ClientError`] classifies failures into the
//! categories the retry and circuit-breaker layers reason about.

pub mod config;
pub mod error;
pub mod server;

pub use config::{ClientConfig, ConfigValue};
pub use error::{ClassifierChain, ClientError, ClientResult, ErrorClassifier, ErrorKind};
pub use server::{CLUSTER_UNKNOWN, DEFAULT_WEIGHT, Server};
