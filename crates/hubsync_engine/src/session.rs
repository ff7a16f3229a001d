//! Which sync role runs on which connection type.

use crate::client::{ClientState, SyncClient};
use crate::error::{EngineError, EngineResult};
use crate::events::SyncRole;
use hubsync_core::ConnectionType;
use hubsync_server::{ServerState, SyncServer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A running (or stopping) sync role.
#[derive(Clone)]
pub enum Session {
    /// This device is the hub.
    Server(Arc<SyncServer>),
    /// This device is a spoke.
    Client(Arc<SyncClient>),
}

impl Session {
    /// The role this session plays.
    pub fn role(&self) -> SyncRole {
        match self {
            Session::Server(_) => SyncRole::Server,
            Session::Client(_) => SyncRole::Client,
        }
    }

    /// Returns true until the role has fully stopped.
    pub fn is_active(&self) -> bool {
        match self {
            Session::Server(server) => server.state() != ServerState::Stopped,
            Session::Client(client) => client.state() != ClientState::Stopped,
        }
    }

    /// Returns true while a requested stop is still in progress.
    pub fn is_stopping(&self) -> bool {
        match self {
            Session::Server(server) => server.state() == ServerState::Stopping,
            Session::Client(client) => client.state() == ClientState::Stopping,
        }
    }

    /// Returns true if both refer to the same role instance.
    pub fn is_same(&self, other: &Session) -> bool {
        match (self, other) {
            (Session::Server(a), Session::Server(b)) => Arc::ptr_eq(a, b),
            (Session::Client(a), Session::Client(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Wakes the role's poller.
    pub fn sync_now(&self) {
        match self {
            Session::Server(server) => server.sync_now(),
            Session::Client(client) => client.sync_now(),
        }
    }

    /// Asks the role to stop without waiting. Asking a role that is
    /// already stopping is a no-op.
    pub fn request_stop(&self) -> EngineResult<()> {
        let result = match self {
            Session::Server(server) => server.stop(false).map_err(EngineError::from),
            Session::Client(client) => client.stop(false),
        };
        match result {
            Err(_) if self.is_stopping() || !self.is_active() => Ok(()),
            other => other,
        }
    }

    /// Asks the role to stop and waits up to `timeout` for it to finish.
    pub fn stop(&self, timeout: Duration) -> EngineResult<()> {
        self.request_stop()?;

        let deadline = Instant::now() + timeout;
        while self.is_active() {
            if Instant::now() >= deadline {
                return Err(EngineError::InvalidState(format!(
                    "{} did not stop within {timeout:?}",
                    self.role()
                )));
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

/// Sessions keyed by connection type.
///
/// At most one role runs per connection type. A stopping role keeps its
/// slot until it has fully stopped, so nothing new can start over it.
/// Owned by whoever drives the roles and handed by reference to anything
/// that needs to ask.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnectionType, Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session on `connection_type`.
    pub fn get(&self, connection_type: ConnectionType) -> Option<Session> {
        self.sessions.lock().get(&connection_type).cloned()
    }

    /// Records `session` for `connection_type`, returning the one it
    /// replaces.
    pub fn insert(&self, connection_type: ConnectionType, session: Session) -> Option<Session> {
        self.sessions.lock().insert(connection_type, session)
    }

    /// Removes and returns the session on `connection_type`.
    pub fn remove(&self, connection_type: ConnectionType) -> Option<Session> {
        self.sessions.lock().remove(&connection_type)
    }

    /// Removes `session` from `connection_type` once it has fully stopped.
    /// Returns false, leaving the slot alone, while it is still active or
    /// if the slot holds a different session.
    pub fn retire(&self, connection_type: ConnectionType, session: &Session) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(&connection_type) {
            Some(current) if current.is_same(session) && !current.is_active() => {
                sessions.remove(&connection_type);
                true
            }
            _ => false,
        }
    }

    /// Returns true if a role is running or stopping on `connection_type`.
    pub fn is_active(&self, connection_type: ConnectionType) -> bool {
        self.get(connection_type).is_some_and(|s| s.is_active())
    }

    /// The role running on `connection_type`, if any.
    pub fn role(&self, connection_type: ConnectionType) -> Option<SyncRole> {
        self.get(connection_type)
            .filter(Session::is_active)
            .map(|s| s.role())
    }

    /// Connection types with an active session, sorted.
    pub fn connection_types(&self) -> Vec<ConnectionType> {
        let mut types: Vec<ConnectionType> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| session.is_active())
            .map(|(connection_type, _)| *connection_type)
            .collect();
        types.sort();
        types
    }

    /// Stops every session, waiting up to `timeout` for each.
    ///
    /// Every session is asked to stop even if an earlier one fails; the
    /// first failure is returned. Sessions that stop are removed, ones
    /// still stopping keep their slot.
    pub fn stop_all_sync(&self, timeout: Duration) -> EngineResult<()> {
        let sessions: Vec<(ConnectionType, Session)> = self
            .sessions
            .lock()
            .iter()
            .map(|(connection_type, session)| (*connection_type, session.clone()))
            .collect();
        let mut first_error = None;
        for (connection_type, session) in sessions {
            tracing::info!(transport = %connection_type, role = %session.role(), "stopping sync");
            if let Err(err) = session.stop(timeout) {
                tracing::warn!(transport = %connection_type, error = %err, "sync did not stop cleanly");
                first_error.get_or_insert(err);
            }
            self.retire(connection_type, &session);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
