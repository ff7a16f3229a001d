//! # hubsync Server
//!
//! The hub side of a hubsync star.
//!
//! This crate provides:
//! - `SyncServer`: accept loop, request handlers and lifecycle
//! - `PeerRegistry`: spokes known to the current run
//! - `FanOut`: keyed pushes to active spokes
//!
//! # Architecture
//!
//! One thread accepts connections and queues them on a handler pool. A
//! handler reads one request:
//! - `HANDSHAKE`: under the handshake side of the `HandshakeLock`, register
//!   the sender and reply with every transmittable record
//! - `UPDATE`: under the update side, apply the batch and queue it for
//!   every other active spoke
//!
//! Pushes run on a separate sender pool keyed by peer id, each one holding
//! the update side of the lock while it connects and writes. The server's
//! own `UpdatePoller` feeds local changes into the same fan-out.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod peer;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{FanOut, HandlerContext, RequestHandler};
pub use peer::{Peer, PeerRegistry};
pub use server::{ServerState, SyncServer};
