//! Chooses and drives the sync role for one connection type.

use crate::client::SyncClient;
use crate::config::ManagerConfig;
use crate::error::EngineResult;
use crate::events::{SyncEvent, SyncEventListener, SyncRole, TransportEvent};
use crate::session::{Session, SessionRegistry};
use hubsync_core::{ConnectionType, EntityStore, PeerAddress, Transport};
use hubsync_server::SyncServer;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// What [`SyncManager::start_sync`] should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// Become the hub.
    Serve,
    /// Become a spoke of the hub at `server`.
    Join {
        /// The hub's server address.
        server: PeerAddress,
    },
}

impl SyncTarget {
    /// The role this target starts.
    pub fn role(&self) -> SyncRole {
        match self {
            SyncTarget::Serve => SyncRole::Server,
            SyncTarget::Join { .. } => SyncRole::Client,
        }
    }
}

/// Turns transport events into a running server or client.
///
/// Starting a session while one runs on the same connection type stops
/// the old one first. Lifecycle outcomes are reported to the registered
/// [`SyncEventListener`]s.
///
/// # Example
///
/// ```no_run
/// use hubsync_core::transport::{TcpTransport, TcpTransportConfig};
/// use hubsync_core::MemoryEntityStore;
/// use hubsync_engine::{ManagerConfig, SyncManager, SyncEvent, TransportEvent};
/// use std::sync::Arc;
///
/// let manager = SyncManager::new(
///     Arc::new(MemoryEntityStore::new()),
///     Arc::new(TcpTransport::new(TcpTransportConfig::default())),
///     ManagerConfig::new("device-a"),
/// );
/// manager.add_listener(Arc::new(|event: &SyncEvent| println!("{event:?}")));
/// manager.handle_transport_event(TransportEvent::GroupFormed {
///     is_owner: false,
///     owner_host: "192.168.49.1".into(),
/// });
/// ```
pub struct SyncManager {
    store: Arc<dyn EntityStore>,
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    sessions: Arc<SessionRegistry>,
    listeners: RwLock<Vec<Arc<dyn SyncEventListener>>>,
    transition: Mutex<()>,
}

impl SyncManager {
    /// Creates a manager with its own session registry.
    pub fn new(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
    ) -> Self {
        Self::with_sessions(store, transport, config, Arc::new(SessionRegistry::new()))
    }

    /// Creates a manager that records its sessions in `sessions`, shared
    /// with managers for other connection types.
    pub fn with_sessions(
        store: Arc<dyn EntityStore>,
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            sessions,
            listeners: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Registers an event listener.
    pub fn add_listener(&self, listener: Arc<dyn SyncEventListener>) {
        self.listeners.write().push(listener);
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The connection type this manager drives.
    pub fn connection_type(&self) -> ConnectionType {
        self.transport.connection_type()
    }

    /// Reacts to a transport event.
    ///
    /// Start and stop failures are reported as events and logged, not
    /// returned.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::GroupFormed {
                is_owner,
                owner_host,
            } => {
                let target = if is_owner {
                    SyncTarget::Serve
                } else {
                    SyncTarget::Join {
                        server: self.transport.server_address(&owner_host),
                    }
                };
                if let Err(err) = self.start_sync(target) {
                    tracing::warn!(error = %err, "cannot start sync for new group");
                }
            }
            TransportEvent::GroupLost => {
                if let Err(err) = self.stop_sync(true) {
                    tracing::warn!(error = %err, "sync did not stop cleanly");
                }
            }
            TransportEvent::PeersDiscovered { devices, complete } => {
                self.emit(&SyncEvent::PeersAvailable { devices, complete });
            }
            TransportEvent::DiscoveryFailed(reason) => {
                self.emit(&SyncEvent::DiscoveryFailure(reason));
            }
            TransportEvent::Disconnected => self.emit(&SyncEvent::DisconnectSuccess),
            TransportEvent::DisconnectFailed(reason) => {
                self.emit(&SyncEvent::DisconnectFailure(reason));
            }
        }
    }

    /// Starts `target`, stopping whatever runs on this connection type
    /// first.
    pub fn start_sync(&self, target: SyncTarget) -> EngineResult<()> {
        let _transition = self.transition.lock();
        let connection_type = self.connection_type();

        // A role still stopping from an earlier stop_sync(false) is waited
        // for here, so its listener is released before the new one binds.
        if let Some(previous) = self.sessions.get(connection_type) {
            if previous.is_active() {
                tracing::info!(
                    transport = %connection_type,
                    role = %previous.role(),
                    stopping = previous.is_stopping(),
                    "waiting for previous sync session"
                );
                if let Err(err) = previous.stop(self.config.stop_timeout) {
                    self.emit(&SyncEvent::ConnectionFailure(err.to_string()));
                    return Err(err);
                }
            }
            self.sessions.retire(connection_type, &previous);
        }

        let role = target.role();
        match self.launch(target) {
            Ok(session) => {
                self.sessions.insert(connection_type, session);
                tracing::info!(transport = %connection_type, role = %role, "sync started");
                self.emit(&SyncEvent::ConnectionSuccess(role));
                Ok(())
            }
            Err(err) => {
                self.emit(&SyncEvent::ConnectionFailure(err.to_string()));
                Err(err)
            }
        }
    }

    fn launch(&self, target: SyncTarget) -> EngineResult<Session> {
        match target {
            SyncTarget::Serve => {
                let server = Arc::new(SyncServer::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.transport),
                    self.config.server.clone(),
                ));
                server.start()?;
                Ok(Session::Server(server))
            }
            SyncTarget::Join { server } => {
                let client = Arc::new(SyncClient::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.transport),
                    server,
                    self.config.client_config(),
                ));
                client.start()?;
                Ok(Session::Client(client))
            }
        }
    }

    /// Stops the session on this connection type. Returns false if none
    /// was running.
    ///
    /// With `await_termination` the call waits up to the stop timeout for
    /// the role to finish. Without it the session keeps its slot until it
    /// has stopped, and the next [`start_sync`](Self::start_sync) waits
    /// for it.
    pub fn stop_sync(&self, await_termination: bool) -> EngineResult<bool> {
        let _transition = self.transition.lock();
        let connection_type = self.connection_type();
        let Some(session) = self.sessions.get(connection_type) else {
            return Ok(false);
        };
        if !session.is_active() {
            self.sessions.retire(connection_type, &session);
            return Ok(false);
        }

        let already_stopping = session.is_stopping();
        let result = if await_termination {
            session.stop(self.config.stop_timeout)
        } else {
            session.request_stop()
        };
        self.sessions.retire(connection_type, &session);
        if !already_stopping {
            self.emit(&SyncEvent::SyncStopped);
        }
        result.map(|()| true)
    }

    /// Returns true while a role runs, or is still stopping, on this
    /// connection type.
    pub fn is_sync_active(&self) -> bool {
        self.sessions.is_active(self.connection_type())
    }

    /// The role running on this connection type.
    pub fn active_role(&self) -> Option<SyncRole> {
        self.sessions.role(self.connection_type())
    }

    /// Wakes the running role's poller.
    pub fn sync_now(&self) {
        if let Some(session) = self.sessions.get(self.connection_type()) {
            session.sync_now();
        }
    }

    fn emit(&self, event: &SyncEvent) {
        for listener in self.listeners.read().iter() {
            listener.on_event(event);
        }
    }
}
