//! # hubsync Core
//!
//! Shared machinery for the hubsync server and client.
//!
//! This crate provides:
//! - The `EntityStore` contract and an in-memory reference store
//! - Transport contracts (`Connection`, `ConnectionListener`, `Connector`,
//!   `Transport`) and a TCP implementation
//! - `HandshakeLock`, a two-category mutual exclusion gate
//! - `UpdatePoller`, the dirty-record scanner
//! - `WorkerPool`, bounded task queues drained by named threads
//! - `StopSignal`, an interruptible sleep used for cooperative shutdown
//!
//! ## Key Invariants
//!
//! - Handshakes and update sends never run at the same time
//! - A record is only transmitted once it and everything it references
//!   has a valid global id
//! - Only `UpdatePoller::reset_dirty_flag` removes a record from future
//!   dirty scans
//! - Every blocking wait observes shutdown

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod apply;
mod clock;
mod config;
mod error;
mod lock;
mod memory;
mod poller;
mod pool;
mod signal;
mod store;
pub mod transport;

pub use apply::{apply_batch, ApplySummary};
pub use clock::{unix_millis, unix_seconds};
pub use config::{PollerConfig, Timeouts};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use lock::{HandshakeGuard, HandshakeLock, LockKind};
pub use memory::MemoryEntityStore;
pub use poller::{Delivery, UpdateListener, UpdatePoller};
pub use pool::WorkerPool;
pub use signal::{StopSignal, Wake};
pub use store::{ApplyOutcome, EntityStore};
pub use transport::{
    Connection, ConnectionListener, ConnectionType, Connector, ListenerRole, PeerAddress,
    Transport,
};

pub use hubsync_protocol as protocol;
