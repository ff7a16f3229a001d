//! Known remote peers.

use hubsync_core::{ConnectionType, PeerAddress};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A remote device that has handshaked with this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Stable id of the remote install.
    pub unique_id: String,
    /// Where the peer accepts pushes.
    pub address: PeerAddress,
    /// Unix seconds of the last successful push, 0 if none yet.
    pub last_update_time: u64,
    /// False once a push to the peer failed.
    pub active: bool,
}

impl Peer {
    /// Creates an active peer.
    pub fn new(unique_id: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            unique_id: unique_id.into(),
            address,
            last_update_time: 0,
            active: true,
        }
    }

    /// The link type the peer was reached over.
    pub fn connection_type(&self) -> ConnectionType {
        self.address.connection_type
    }
}

/// Map of unique id to [`Peer`] behind a single mutex.
///
/// Peers are never removed; a failed push only marks them inactive.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the peer with `unique_id`.
    pub fn get(&self, unique_id: &str) -> Option<Peer> {
        self.peers.lock().get(unique_id).cloned()
    }

    /// Inserts `peer`, or refreshes the stored entry's address and active
    /// flag. Returns true if the peer was new.
    pub fn upsert(&self, peer: Peer) -> bool {
        let mut peers = self.peers.lock();
        match peers.get_mut(&peer.unique_id) {
            Some(existing) => {
                existing.address = peer.address;
                existing.active = peer.active;
                existing.last_update_time = existing.last_update_time.max(peer.last_update_time);
                false
            }
            None => {
                peers.insert(peer.unique_id.clone(), peer);
                true
            }
        }
    }

    /// Calls `f` for every active peer except `exclude`. Returns the count.
    ///
    /// The active set is copied under the lock and `f` runs without it,
    /// so `f` may block on the network or call back into the registry.
    pub fn for_each_active<F>(&self, exclude: Option<&str>, mut f: F) -> usize
    where
        F: FnMut(&Peer),
    {
        let active: Vec<Peer> = self
            .peers
            .lock()
            .values()
            .filter(|p| p.active && Some(p.unique_id.as_str()) != exclude)
            .cloned()
            .collect();

        for peer in &active {
            f(peer);
        }
        active.len()
    }

    /// Marks a peer unreachable at `address`. Returns false, changing
    /// nothing, if the peer has since registered a different address.
    pub fn mark_inactive(&self, unique_id: &str, address: &PeerAddress) -> bool {
        match self.peers.lock().get_mut(unique_id) {
            Some(peer) if peer.address == *address => {
                peer.active = false;
                true
            }
            _ => false,
        }
    }

    /// Records a successful push at `now` (Unix seconds).
    pub fn touch(&self, unique_id: &str, now: u64) {
        if let Some(peer) = self.peers.lock().get_mut(unique_id) {
            peer.last_update_time = now;
        }
    }

    /// Returns copies of every peer, sorted by id.
    pub fn all(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.lock().values().cloned().collect();
        peers.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        peers
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Returns true if no peer is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active peers.
    pub fn active_count(&self) -> usize {
        self.peers.lock().values().filter(|p| p.active).count()
    }
}
