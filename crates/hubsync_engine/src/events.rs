//! Events exchanged with the transport layer and the host application.

use std::fmt;

/// Which side of the star this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncRole {
    /// The hub.
    Server,
    /// A spoke.
    Client,
}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncRole::Server => f.write_str("server"),
            SyncRole::Client => f.write_str("client"),
        }
    }
}

/// What the transport layer reports about groups and discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A group formed. The owner becomes the server; everyone else
    /// connects to `owner_host`.
    GroupFormed {
        /// True if this device owns the group.
        is_owner: bool,
        /// Host of the group owner.
        owner_host: String,
    },
    /// The group dissolved or the link dropped.
    GroupLost,
    /// Discovery found devices.
    PeersDiscovered {
        /// Device names or handles.
        devices: Vec<String>,
        /// False while discovery is still running.
        complete: bool,
    },
    /// Discovery failed.
    DiscoveryFailed(String),
    /// A requested disconnect finished.
    Disconnected,
    /// A requested disconnect failed.
    DisconnectFailed(String),
}

/// Lifecycle events raised to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Devices are available to connect to.
    PeersAvailable {
        /// Device names or handles.
        devices: Vec<String>,
        /// False while discovery is still running.
        complete: bool,
    },
    /// Discovery failed.
    DiscoveryFailure(String),
    /// A role started.
    ConnectionSuccess(SyncRole),
    /// A role failed to start.
    ConnectionFailure(String),
    /// The link was torn down.
    DisconnectSuccess,
    /// Tearing down the link failed.
    DisconnectFailure(String),
    /// The running role stopped.
    SyncStopped,
}

/// Receives [`SyncEvent`]s.
pub trait SyncEventListener: Send + Sync {
    /// Called on the thread that caused the event.
    fn on_event(&self, event: &SyncEvent);
}

impl<F> SyncEventListener for F
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}
