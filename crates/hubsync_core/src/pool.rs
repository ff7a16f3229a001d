//! Bounded task queues drained by a fixed set of named threads.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Idle {
    in_flight: Mutex<usize>,
    changed: Condvar,
}

impl Idle {
    fn enter(&self) {
        *self.in_flight.lock() += 1;
    }

    fn leave(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.changed.notify_all();
        }
    }
}

/// Decrements the in-flight count even if the handler panics.
struct Finished<'a>(&'a Idle);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// A fixed-size pool of worker threads, each with its own bounded queue.
///
/// Tasks submitted with the same key always land on the same worker and
/// run in submission order. A full queue blocks the submitter, which is
/// the pool's only form of backpressure.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    queues: RwLock<Vec<SyncSender<T>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    idle: Arc<Idle>,
    next: AtomicUsize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `workers` threads named `{name}-{n}`, each with a queue of
    /// `capacity` tasks, all running `handler`.
    pub fn new<F>(name: &str, workers: usize, capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let idle = Arc::new(Idle::default());
        let mut queues = Vec::with_capacity(workers.max(1));
        let mut handles = Vec::with_capacity(workers.max(1));

        for n in 0..workers.max(1) {
            let (tx, rx) = mpsc::sync_channel::<T>(capacity.max(1));
            let handler = Arc::clone(&handler);
            let idle = Arc::clone(&idle);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || drain(rx, &*handler, &idle))?;
            queues.push(tx);
            handles.push(handle);
        }

        Ok(Self {
            name: name.to_string(),
            queues: RwLock::new(queues),
            workers: Mutex::new(handles),
            idle,
            next: AtomicUsize::new(0),
        })
    }

    /// Queues a task on the next worker in turn.
    pub fn submit(&self, task: T) -> SyncResult<()> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.submit_to(slot, task)
    }

    /// Queues a task on the worker that owns `key`.
    pub fn submit_keyed<K: Hash + ?Sized>(&self, key: &K, task: T) -> SyncResult<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.submit_to(hasher.finish() as usize, task)
    }

    fn submit_to(&self, slot: usize, task: T) -> SyncResult<()> {
        let queue = {
            let queues = self.queues.read();
            if queues.is_empty() {
                return Err(SyncError::Interrupted);
            }
            queues[slot % queues.len()].clone()
        };

        self.idle.enter();
        if queue.send(task).is_err() {
            self.idle.leave();
            return Err(SyncError::Interrupted);
        }
        Ok(())
    }

    /// Returns the number of tasks queued or running.
    pub fn in_flight(&self) -> usize {
        *self.idle.in_flight.lock()
    }

    /// Blocks until every submitted task has finished or `timeout` passes.
    /// Returns true if the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.idle.in_flight.lock();
        while *in_flight > 0 {
            if self
                .idle
                .changed
                .wait_until(&mut in_flight, deadline)
                .timed_out()
            {
                return *in_flight == 0;
            }
        }
        true
    }

    /// Closes the queues and joins the workers once they drain.
    ///
    /// Workers still busy after `grace` are left to finish on their own.
    /// Returns true if every worker was joined.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.queues.write().clear();
        let drained = self.wait_idle(grace);

        let handles = std::mem::take(&mut *self.workers.lock());
        let mut joined = true;
        for handle in handles {
            if handle.is_finished() || drained {
                if handle.join().is_err() {
                    tracing::error!(pool = %self.name, "worker panicked");
                }
            } else {
                joined = false;
            }
        }

        if !joined {
            tracing::warn!(pool = %self.name, "workers still busy after grace period");
        }
        joined
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.queues.get_mut().clear();
    }
}

fn drain<T>(rx: Receiver<T>, handler: &dyn Fn(T), idle: &Idle) {
    for task in rx {
        let _finished = Finished(idle);
        handler(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_every_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let pool = {
            let count = Arc::clone(&count);
            WorkerPool::new("test", 3, 4, move |n: usize| {
                count.fetch_add(n, Ordering::SeqCst);
            })
            .unwrap()
        };

        for _ in 0..20 {
            pool.submit(1).unwrap();
        }
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::SeqCst), 20);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn keyed_tasks_keep_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = {
            let seen = Arc::clone(&seen);
            WorkerPool::new("ordered", 4, 2, move |(peer, n): (&'static str, usize)| {
                thread::sleep(Duration::from_millis(1));
                seen.lock().push((peer, n));
            })
            .unwrap()
        };

        for n in 0..10 {
            pool.submit_keyed("peer-a", ("peer-a", n)).unwrap();
            pool.submit_keyed("peer-b", ("peer-b", n)).unwrap();
        }
        assert!(pool.shutdown(Duration::from_secs(5)));

        let seen = seen.lock();
        for peer in ["peer-a", "peer-b"] {
            let order: Vec<usize> = seen
                .iter()
                .filter(|(p, _)| *p == peer)
                .map(|(_, n)| *n)
                .collect();
            assert_eq!(order, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn submit_after_shutdown_is_interrupted() {
        let pool = WorkerPool::new("closed", 1, 1, |_: ()| {}).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)));
        assert!(matches!(pool.submit(()), Err(SyncError::Interrupted)));
        assert!(matches!(
            pool.submit_keyed(&1u8, ()),
            Err(SyncError::Interrupted)
        ));
    }

    #[test]
    fn shutdown_gives_up_on_stuck_worker() {
        let release = Arc::new((Mutex::new(false), Condvar::new()));
        let pool = {
            let release = Arc::clone(&release);
            WorkerPool::new("stuck", 1, 1, move |_: ()| {
                let (lock, cvar) = &*release;
                let mut done = lock.lock();
                while !*done {
                    cvar.wait(&mut done);
                }
            })
            .unwrap()
        };

        pool.submit(()).unwrap();
        assert!(!pool.shutdown(Duration::from_millis(50)));

        let (lock, cvar) = &*release;
        *lock.lock() = true;
        cvar.notify_all();
    }
}
