//! Configuration for the client and manager.

use hubsync_core::PollerConfig;
use hubsync_protocol::ConflictPolicy;
use hubsync_server::ServerConfig;
use std::time::Duration;

/// Configuration for a sync client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stable id of this install, sent as the sender id.
    pub unique_id: String,
    /// Poll interval for local changes.
    pub poller: PollerConfig,
    /// How inbound records are reconciled.
    pub conflict_policy: ConflictPolicy,
    /// How long `stop` waits for the client's threads.
    pub shutdown_grace: Duration,
}

impl ClientConfig {
    /// Creates a client configuration.
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            poller: PollerConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Sets the unique id.
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    /// Sets the poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Configuration for a sync manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Stable id of this install.
    pub unique_id: String,
    /// Used when this device becomes the server.
    pub server: ServerConfig,
    /// Used when this device becomes a client. Its `unique_id` is replaced
    /// by the manager's.
    pub client: ClientConfig,
    /// How long to wait for a running role to stop before starting another.
    pub stop_timeout: Duration,
}

impl ManagerConfig {
    /// Creates a manager configuration.
    pub fn new(unique_id: impl Into<String>) -> Self {
        let unique_id = unique_id.into();
        Self {
            client: ClientConfig::new(unique_id.clone()),
            unique_id,
            server: ServerConfig::default(),
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the server configuration.
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Sets the client configuration.
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Sets the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The client configuration with this manager's id.
    pub fn client_config(&self) -> ClientConfig {
        self.client.clone().with_unique_id(self.unique_id.clone())
    }
}
