//! Two-category handshake/update gate.
//!
//! Any number of handshakes may run together, and any number of update
//! sends may run together, but the two categories never overlap. A
//! handshake therefore reads a store snapshot and registers its peer
//! without a broadcast racing it.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};

/// Category of work guarded by a [`HandshakeLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Snapshot + peer registration.
    Handshake,
    /// Applying and forwarding updates.
    Update,
}

#[derive(Debug, Default)]
struct Counts {
    handshakes: usize,
    updates: usize,
    shutdown: bool,
}

/// Gate that keeps handshakes and updates apart.
///
/// Not a readers/writer lock: neither side has priority, and there is no
/// starvation avoidance. Waiters are released with
/// [`SyncError::Interrupted`] once [`shutdown`](Self::shutdown) is called.
#[derive(Debug, Default)]
pub struct HandshakeLock {
    counts: Mutex<Counts>,
    released: Condvar,
}

/// Holds one acquisition of a [`HandshakeLock`]; releases it on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct HandshakeGuard<'a> {
    lock: &'a HandshakeLock,
    kind: LockKind,
}

impl HandshakeGuard<'_> {
    /// The category this guard holds.
    pub fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(self.kind);
    }
}

impl HandshakeLock {
    /// Creates an unlocked gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no work of the other category is running, then enters.
    pub fn lock(&self, kind: LockKind) -> SyncResult<HandshakeGuard<'_>> {
        let mut counts = self.counts.lock();
        loop {
            if counts.shutdown {
                return Err(SyncError::Interrupted);
            }
            let blocked = match kind {
                LockKind::Handshake => counts.updates > 0,
                LockKind::Update => counts.handshakes > 0,
            };
            if !blocked {
                break;
            }
            self.released.wait(&mut counts);
        }

        match kind {
            LockKind::Handshake => counts.handshakes += 1,
            LockKind::Update => counts.updates += 1,
        }
        Ok(HandshakeGuard { lock: self, kind })
    }

    fn unlock(&self, kind: LockKind) {
        let mut counts = self.counts.lock();
        match kind {
            LockKind::Handshake => counts.handshakes = counts.handshakes.saturating_sub(1),
            LockKind::Update => counts.updates = counts.updates.saturating_sub(1),
        }
        if counts.handshakes == 0 && counts.updates == 0 {
            self.released.notify_all();
        }
    }

    /// Releases every current and future waiter with `Interrupted`.
    ///
    /// Holders keep their guards until they drop them.
    pub fn shutdown(&self) {
        let mut counts = self.counts.lock();
        counts.shutdown = true;
        self.released.notify_all();
    }

    /// Returns `(handshakes, updates)` currently inside the gate.
    pub fn counts(&self) -> (usize, usize) {
        let counts = self.counts.lock();
        (counts.handshakes, counts.updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_kind_shares() {
        let lock = HandshakeLock::new();
        let a = lock.lock(LockKind::Update).unwrap();
        let b = lock.lock(LockKind::Update).unwrap();
        assert_eq!(lock.counts(), (0, 2));
        drop(a);
        drop(b);
        assert_eq!(lock.counts(), (0, 0));
    }

    #[test]
    fn other_kind_waits() {
        let lock = Arc::new(HandshakeLock::new());
        let update = lock.lock(LockKind::Update).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let guard = lock.lock(LockKind::Handshake).unwrap();
                lock.counts().1 == 0 && guard.kind() == LockKind::Handshake
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(lock.counts(), (0, 1));
        drop(update);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn shutdown_releases_waiters() {
        let lock = Arc::new(HandshakeLock::new());
        let _held = lock.lock(LockKind::Handshake).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(LockKind::Update).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(50));
        lock.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(SyncError::Interrupted)));
        assert!(matches!(
            lock.lock(LockKind::Handshake),
            Err(SyncError::Interrupted)
        ));
    }
}
