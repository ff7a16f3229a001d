//! Cooperative stop and wake-up signalling.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why [`StopSignal::sleep`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full interval elapsed.
    Elapsed,
    /// Someone asked for an early wake-up.
    Woken,
    /// The owner is stopping.
    Stopped,
}

#[derive(Default)]
struct State {
    stopped: bool,
    wake_pending: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

/// A cloneable stop flag with an interruptible sleep.
///
/// Loops check [`is_stopped`](Self::is_stopped) between units of work and
/// park in [`sleep`](Self::sleep) between ticks; [`stop`](Self::stop)
/// releases every sleeper at once.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    /// Creates a signal that is not stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes every sleeper.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.stopped = true;
        self.inner.changed.notify_all();
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Wakes the current (or next) sleeper early without stopping it.
    pub fn wake(&self) {
        let mut state = self.inner.state.lock();
        state.wake_pending = true;
        self.inner.changed.notify_all();
    }

    /// Sleeps for up to `interval`.
    pub fn sleep(&self, interval: Duration) -> Wake {
        let deadline = Instant::now() + interval;
        let mut state = self.inner.state.lock();
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if state.wake_pending {
                state.wake_pending = false;
                return Wake::Woken;
            }
            if self
                .inner
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return if state.stopped {
                    Wake::Stopped
                } else {
                    Wake::Elapsed
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_elapses() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert_eq!(signal.sleep(Duration::from_millis(30)), Wake::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_interrupts_sleeper() {
        let signal = StopSignal::new();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.sleep(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        signal.stop();
        assert_eq!(sleeper.join().unwrap(), Wake::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(signal.is_stopped());
    }

    #[test]
    fn wake_is_remembered_until_consumed() {
        let signal = StopSignal::new();
        signal.wake();
        assert_eq!(signal.sleep(Duration::from_secs(30)), Wake::Woken);
        assert_eq!(signal.sleep(Duration::from_millis(5)), Wake::Elapsed);
    }

    #[test]
    fn stopped_signal_never_sleeps() {
        let signal = StopSignal::new();
        signal.stop();
        assert_eq!(signal.sleep(Duration::from_secs(30)), Wake::Stopped);
    }
}
