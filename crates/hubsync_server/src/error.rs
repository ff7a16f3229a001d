//! Error types for the sync server.

use hubsync_core::SyncError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be set up. Fatal to `start`.
    #[error("cannot open listener: {0}")]
    Listener(SyncError),

    /// The call does not fit the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A worker thread could not be spawned.
    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Sync failure outside a connection handler.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

impl ServerError {
    /// Returns true if the server never reached `Running`.
    pub fn is_start_failure(&self) -> bool {
        matches!(self, ServerError::Listener(_) | ServerError::Spawn(_))
    }
}
