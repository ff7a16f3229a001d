//! # hubsync Engine
//!
//! Roles and lifecycle above the hub.
//!
//! This crate provides:
//! - `SyncClient`: handshake, snapshot apply, local push, server push receiver
//! - `SyncManager`: role selection from transport events, lifecycle events
//! - `SessionRegistry`: the running role per connection type
//! - Device identity persistence
//!
//! ## Lifecycle
//!
//! ```text
//! GroupFormed(owner)      -> SyncServer  Stopped -> Starting -> Running
//! GroupFormed(not owner)  -> SyncClient  Stopped -> Handshaking -> Running
//! GroupLost / stop_sync   -> running role -> Stopping -> Stopped
//! ```
//!
//! ## Key Invariants
//!
//! - At most one role runs per connection type
//! - A new session stops the previous one before starting
//! - A failed client handshake fails the start and is not retried
//! - Every stop is bounded: blocked accepts, sleeps and lock waits are
//!   interrupted

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;
mod events;
mod identity;
mod manager;
mod session;

pub use client::{ClientState, SyncClient};
pub use config::{ClientConfig, ManagerConfig};
pub use error::{EngineError, EngineResult};
pub use events::{SyncEvent, SyncEventListener, SyncRole, TransportEvent};
pub use identity::load_or_create_unique_id;
pub use manager::{SyncManager, SyncTarget};
pub use session::{Session, SessionRegistry};
