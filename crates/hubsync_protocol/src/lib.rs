//! # hubsync Protocol
//!
//! Wire types and framing for hubsync.
//!
//! This crate provides:
//! - `Entity` and `EntityRef`, the record envelope exchanged between peers
//! - `Request` (HANDSHAKE | UPDATE) and `Response` messages
//! - Length-prefixed framing over any byte stream
//! - `ConflictPolicy` for deciding whether an inbound record wins
//!
//! Messages are JSON; every entity carries its `kind` so the receiving
//! store can route it to the right table.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod conflict;
mod entity;
mod error;
mod frame;
mod messages;

pub use conflict::ConflictPolicy;
pub use entity::{Entity, EntityKey, EntityKind, EntityRef, GlobalId, LocalId};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{encode_frame, read_frame, write_frame, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use messages::{Request, RequestType, Response};
