//! Attempt bookkeeping for one balanced call.

use std::sync::Arc;

use ballast_core::Server;

/// Snapshot of how far a call has progressed, handed to retry policies
/// and surfaced alongside terminal errors.
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub server: Option<Arc<Server>>,
    pub past_attempts_on_server: usize,
    pub past_servers_attempted: usize,
}

/// Counters for one in-flight call.
///
/// `attempts` counts tries against the current server and resets each
/// time the call is re-aimed; `server_attempts` counts how many servers
/// the call has been aimed at so far.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    server: Option<Arc<Server>>,
    server_attempts: usize,
    attempts: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aim the call at a server.
    pub fn set_server(&mut self, server: Arc<Server>) {
        self.server = Some(server);
        self.server_attempts += 1;
        self.attempts = 0;
    }

    pub fn server(&self) -> Option<&Arc<Server>> {
        self.server.as_ref()
    }

    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Attempts made against the current server.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Servers this call has been aimed at.
    pub fn server_attempts(&self) -> usize {
        self.server_attempts
    }

    /// Snapshot taken while an attempt is running; the running attempt
    /// is not counted as past.
    pub fn to_execution_info(&self) -> ExecutionInfo {
        ExecutionInfo {
            server: self.server.clone(),
            past_attempts_on_server: self.attempts.saturating_sub(1),
            past_servers_attempted: self.server_attempts.saturating_sub(1),
        }
    }

    /// Snapshot taken after the call settled; every attempt is past.
    pub fn to_final_execution_info(&self) -> ExecutionInfo {
        ExecutionInfo {
            server: self.server.clone(),
            past_attempts_on_server: self.attempts,
            past_servers_attempted: self.server_attempts.saturating_sub(1),
        }
    }
}
