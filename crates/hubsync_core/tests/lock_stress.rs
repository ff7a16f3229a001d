//! Concurrency stress for the handshake/update gate.

use hubsync_core::{HandshakeLock, LockKind, SyncError};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

struct Observed {
    handshakes: AtomicUsize,
    updates: AtomicUsize,
    violated: AtomicBool,
    max_handshakes: AtomicUsize,
    max_updates: AtomicUsize,
}

impl Observed {
    fn new() -> Self {
        Self {
            handshakes: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            violated: AtomicBool::new(false),
            max_handshakes: AtomicUsize::new(0),
            max_updates: AtomicUsize::new(0),
        }
    }
}

fn hammer(handshakers: usize, updaters: usize, rounds: usize, hold_us: u64) -> Arc<Observed> {
    let lock = Arc::new(HandshakeLock::new());
    let observed = Arc::new(Observed::new());
    let barrier = Arc::new(Barrier::new(handshakers + updaters));

    let kinds = std::iter::repeat(LockKind::Handshake)
        .take(handshakers)
        .chain(std::iter::repeat(LockKind::Update).take(updaters));

    let handles: Vec<_> = kinds
        .map(|kind| {
            let lock = Arc::clone(&lock);
            let observed = Arc::clone(&observed);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..rounds {
                    let _guard = lock.lock(kind).unwrap();
                    let (mine, theirs, max) = match kind {
                        LockKind::Handshake => (
                            &observed.handshakes,
                            &observed.updates,
                            &observed.max_handshakes,
                        ),
                        LockKind::Update => (
                            &observed.updates,
                            &observed.handshakes,
                            &observed.max_updates,
                        ),
                    };

                    let now = mine.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    let (h, u) = lock.counts();
                    if theirs.load(Ordering::SeqCst) != 0 || (h > 0 && u > 0) {
                        observed.violated.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(hold_us));
                    mine.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.counts(), (0, 0));
    observed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn categories_never_overlap(
        handshakers in 1usize..5,
        updaters in 1usize..5,
        rounds in 1usize..20,
        hold_us in 0u64..200,
    ) {
        let observed = hammer(handshakers, updaters, rounds, hold_us);
        prop_assert!(!observed.violated.load(Ordering::SeqCst));
    }
}

#[test]
fn same_category_runs_concurrently() {
    let observed = hammer(0, 4, 5, 20_000);
    assert!(observed.max_updates.load(Ordering::SeqCst) > 1);
    assert_eq!(observed.max_handshakes.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_unblocks_every_waiter() {
    let lock = Arc::new(HandshakeLock::new());
    let held = lock.lock(LockKind::Update).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.lock(LockKind::Handshake).map(|_| ()))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    lock.shutdown();
    for waiter in waiters {
        assert!(matches!(waiter.join().unwrap(), Err(SyncError::Interrupted)));
    }
    drop(held);
    assert_eq!(lock.counts(), (0, 0));
}
