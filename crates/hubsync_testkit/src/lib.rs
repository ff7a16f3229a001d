//! # hubsync Testkit
//!
//! Test utilities for hubsync.
//!
//! This crate provides:
//! - An in-memory network implementing the transport contracts, with
//!   fault injection
//! - Probes that stand in for remote peers
//! - Entity fixtures and property-based generators
//! - Polling and concurrency helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hubsync_testkit::prelude::*;
//!
//! let network = MemoryNetwork::new();
//! let hub = network.transport("hub");
//! let probe = PeerProbe::bind(&network, "phone-a");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod network;
pub mod probe;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::network::*;
    pub use crate::probe::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use network::*;
pub use probe::*;
pub use stress::*;
