//! Server configuration.

use hubsync_core::PollerConfig;
use hubsync_protocol::ConflictPolicy;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Poll interval for the server's own local changes.
    pub poller: PollerConfig,
    /// Threads handling inbound connections.
    pub handler_workers: usize,
    /// Threads pushing to peers.
    pub sender_workers: usize,
    /// Queue depth per worker.
    pub queue_capacity: usize,
    /// How long `stop` waits for in-flight work.
    pub shutdown_grace: Duration,
    /// How inbound records are reconciled with stored ones.
    pub conflict_policy: ConflictPolicy,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            poller: PollerConfig::default(),
            handler_workers: 4,
            sender_workers: 4,
            queue_capacity: 64,
            shutdown_grace: Duration::from_secs(5),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Sets the poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the number of inbound handler threads.
    pub fn with_handler_workers(mut self, workers: usize) -> Self {
        self.handler_workers = workers;
        self
    }

    /// Sets the number of outbound sender threads.
    pub fn with_sender_workers(mut self, workers: usize) -> Self {
        self.sender_workers = workers;
        self
    }

    /// Sets the per-worker queue depth.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
