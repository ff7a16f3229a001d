//! Error types shared by the sync roles.

use hubsync_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by an `EntityStore`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// The store refused the record.
    #[error("record rejected: {0}")]
    Rejected(String),

    /// The backing storage failed.
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Connect, accept, read or write failed.
    #[error("transport error: {0}")]
    Transport(io::Error),

    /// A bounded wait expired. Drives loop heartbeats; not a failure.
    #[error("operation timed out")]
    Timeout,

    /// The connection is closed or was never opened.
    #[error("not connected")]
    NotConnected,

    /// The peer sent something that is not a valid message.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A wait was cut short because the component is shutting down.
    #[error("interrupted by shutdown")]
    Interrupted,
}

impl SyncError {
    /// Returns true for an expired bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout)
    }

    /// Returns true if the error is the shutdown signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }

    /// Returns true if the error concerns only the remote peer involved,
    /// so the peer should be marked inactive and nothing else aborted.
    pub fn is_peer_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Timeout | SyncError::NotConnected
        )
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SyncError::Timeout,
            io::ErrorKind::NotConnected => SyncError::NotConnected,
            _ => SyncError::Transport(err),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => io.into(),
            other => SyncError::Protocol(other),
        }
    }
}
