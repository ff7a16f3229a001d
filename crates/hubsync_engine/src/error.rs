//! Error types for the sync engine.

use hubsync_core::SyncError;
use hubsync_server::ServerError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running a sync role.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The initial handshake with the server failed. Not retried.
    #[error("handshake failed: {0}")]
    Handshake(SyncError),

    /// The client's push listener could not be opened.
    #[error("cannot open listener: {0}")]
    Listener(SyncError),

    /// The call does not fit the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The server role failed.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// The device identity file could not be read or written.
    #[error("identity file: {0}")]
    Identity(io::Error),

    /// A worker thread could not be spawned.
    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

impl EngineError {
    /// Returns true if the role never reached its running state.
    pub fn is_start_failure(&self) -> bool {
        match self {
            EngineError::Handshake(_) | EngineError::Listener(_) | EngineError::Spawn(_) => true,
            EngineError::Server(err) => err.is_start_failure(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(EngineError::Handshake(SyncError::Timeout).is_start_failure());
        assert!(EngineError::Server(ServerError::Listener(SyncError::NotConnected)).is_start_failure());
        assert!(!EngineError::InvalidState("running".into()).is_start_failure());
    }

    #[test]
    fn error_display() {
        let err = EngineError::Handshake(SyncError::Timeout);
        assert_eq!(err.to_string(), "handshake failed: operation timed out");
    }
}
