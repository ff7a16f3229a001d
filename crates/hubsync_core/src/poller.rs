//! Periodic scan for locally modified records.

use crate::config::PollerConfig;
use crate::error::SyncResult;
use crate::signal::{StopSignal, Wake};
use crate::store::EntityStore;
use hubsync_protocol::{Entity, EntityKey};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outcome of handing a batch to an [`UpdateListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The batch went out; its dirty flags can be cleared.
    Delivered,
    /// The batch did not go out; it will be offered again next tick.
    Failed,
}

/// Receives batches of transmittable dirty records.
pub trait UpdateListener: Send + Sync {
    /// Called with a non-empty batch. Runs on the poller thread.
    fn on_entities_available(&self, entities: &[Entity]) -> Delivery;
}

impl<F> UpdateListener for F
where
    F: Fn(&[Entity]) -> Delivery + Send + Sync,
{
    fn on_entities_available(&self, entities: &[Entity]) -> Delivery {
        self(entities)
    }
}

/// Scans an [`EntityStore`] for dirty records on a fixed interval.
///
/// Each tick takes the dirty records that are not part of a batch still
/// awaiting [`reset_dirty_flag`](Self::reset_dirty_flag), resolves
/// reference global ids, assigns missing global ids, drops anything that
/// is not yet transmittable, and hands the rest to the listener. A batch
/// the listener reports as [`Delivery::Failed`] is released so the same
/// records come back on the next tick.
pub struct UpdatePoller {
    store: Arc<dyn EntityStore>,
    listener: Arc<dyn UpdateListener>,
    config: PollerConfig,
    pending: Mutex<HashSet<EntityKey>>,
    signal: StopSignal,
}

impl UpdatePoller {
    /// Creates a poller. Nothing runs until [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    pub fn new(
        store: Arc<dyn EntityStore>,
        listener: Arc<dyn UpdateListener>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            listener,
            config,
            pending: Mutex::new(HashSet::new()),
            signal: StopSignal::new(),
        }
    }

    /// Collects the next batch and marks it pending, without notifying the
    /// listener.
    pub fn poll_once(&self) -> SyncResult<Vec<Entity>> {
        let mut batch: Vec<Entity> = {
            let pending = self.pending.lock();
            self.store
                .dirty_entities()?
                .into_iter()
                .filter(|e| e.key().is_some_and(|key| !pending.contains(&key)))
                .collect()
        };
        if batch.is_empty() {
            return Ok(batch);
        }

        // References first, so a record and its freshly named target never
        // travel in the same batch.
        self.store.resolve_global_ids(&mut batch)?;

        batch.retain_mut(|entity| {
            if entity.valid_global_id().is_some() {
                return true;
            }
            match self.store.assign_global_id(entity) {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(kind = %entity.kind, error = %err, "cannot assign global id");
                    false
                }
            }
        });

        let before = batch.len();
        batch.retain(Entity::is_transmittable);
        if batch.len() < before {
            tracing::debug!(
                deferred = before - batch.len(),
                "records waiting for references to resolve"
            );
        }

        let mut pending = self.pending.lock();
        pending.extend(batch.iter().filter_map(Entity::key));
        Ok(batch)
    }

    /// Runs one scan and notifies the listener. Returns the batch size.
    pub fn tick(&self) -> SyncResult<usize> {
        let batch = self.poll_once()?;
        if batch.is_empty() {
            return Ok(0);
        }

        tracing::debug!(count = batch.len(), "dirty records available");
        match self.listener.on_entities_available(&batch) {
            Delivery::Delivered => self.reset_dirty_flag(&batch)?,
            Delivery::Failed => {
                tracing::debug!(count = batch.len(), "batch not delivered, will retry");
                self.release(&batch);
            }
        }
        Ok(batch.len())
    }

    /// Clears the dirty flag of a sent batch and forgets it as pending.
    pub fn reset_dirty_flag(&self, entities: &[Entity]) -> SyncResult<()> {
        let result = self.store.clear_dirty(entities);
        self.release(entities);
        result.map_err(Into::into)
    }

    /// Forgets a batch as pending without clearing its dirty flags.
    pub fn release(&self, entities: &[Entity]) {
        let mut pending = self.pending.lock();
        for key in entities.iter().filter_map(Entity::key) {
            pending.remove(&key);
        }
    }

    /// Number of records handed out and not yet reset or released.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Ticks until [`stop_polling`](Self::stop_polling) is called.
    pub fn run(&self) {
        tracing::debug!(interval_ms = self.config.interval.as_millis() as u64, "poller started");
        while !self.signal.is_stopped() {
            if let Err(err) = self.tick() {
                tracing::warn!(error = %err, "poll failed");
            }
            if self.signal.sleep(self.config.interval) == Wake::Stopped {
                break;
            }
        }
        tracing::debug!("poller stopped");
    }

    /// Runs the poller on a new named thread.
    pub fn spawn(self: &Arc<Self>, name: &str) -> io::Result<JoinHandle<()>> {
        let poller = Arc::clone(self);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || poller.run())
    }

    /// Wakes the poller for an immediate scan.
    pub fn sync_now(&self) {
        self.signal.wake();
    }

    /// Stops the poll loop, interrupting its sleep.
    pub fn stop_polling(&self) {
        self.signal.stop();
    }

    /// Returns true once [`stop_polling`](Self::stop_polling) was called.
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEntityStore;
    use hubsync_protocol::{EntityRef, GlobalId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Recorder {
        batches: Mutex<Vec<Vec<Entity>>>,
        outcome: Mutex<Delivery>,
    }

    impl Recorder {
        fn new(outcome: Delivery) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                outcome: Mutex::new(outcome),
            })
        }
    }

    impl UpdateListener for Recorder {
        fn on_entities_available(&self, entities: &[Entity]) -> Delivery {
            self.batches.lock().push(entities.to_vec());
            *self.outcome.lock()
        }
    }

    fn poller(store: &Arc<MemoryEntityStore>, listener: Arc<dyn UpdateListener>) -> UpdatePoller {
        UpdatePoller::new(
            Arc::clone(store) as Arc<dyn EntityStore>,
            listener,
            PollerConfig::new(Duration::from_millis(20)),
        )
    }

    #[test]
    fn references_resolve_one_tick_later() {
        let store = Arc::new(MemoryEntityStore::new());
        let x = store.create(Entity::new("community", json!({"name": "X"})));
        store.create(
            Entity::new("person", json!({"name": "Y"}))
                .with_reference(EntityRef::local("community", "community", x)),
        );

        let recorder = Recorder::new(Delivery::Delivered);
        let poller = poller(&store, recorder.clone());

        assert_eq!(poller.tick().unwrap(), 1);
        assert_eq!(poller.tick().unwrap(), 1);
        assert_eq!(poller.tick().unwrap(), 0);

        let batches = recorder.batches.lock();
        assert_eq!(batches[0][0].kind.as_str(), "community");
        let x_gid = batches[0][0].global_id.clone().unwrap();
        assert!(x_gid.is_valid());

        let y = &batches[1][0];
        assert_eq!(y.kind.as_str(), "person");
        assert!(y.valid_global_id().is_some());
        assert_eq!(y.references[0].global_id.as_ref(), Some(&x_gid));
        assert!(store.dirty_entities().unwrap().is_empty());
    }

    #[test]
    fn assigned_global_id_is_stable() {
        let store = Arc::new(MemoryEntityStore::new());
        store.create(Entity::new("person", json!({})));
        let poller = poller(&store, Recorder::new(Delivery::Failed));

        let first = poller.tick().map(|_| store.dirty_entities().unwrap()).unwrap();
        let second = poller.tick().map(|_| store.dirty_entities().unwrap()).unwrap();
        assert_eq!(first[0].global_id, second[0].global_id);
        assert!(first[0].valid_global_id().is_some());
    }

    #[test]
    fn failed_delivery_keeps_record_dirty() {
        let store = Arc::new(MemoryEntityStore::new());
        store.create(Entity::new("person", json!({"name": "Ada"})));
        let recorder = Recorder::new(Delivery::Failed);
        let poller = poller(&store, recorder.clone());

        assert_eq!(poller.tick().unwrap(), 1);
        assert_eq!(store.dirty_entities().unwrap().len(), 1);
        assert_eq!(poller.pending_count(), 0);

        *recorder.outcome.lock() = Delivery::Delivered;
        assert_eq!(poller.tick().unwrap(), 1);
        assert!(store.dirty_entities().unwrap().is_empty());
        assert_eq!(recorder.batches.lock().len(), 2);
    }

    #[test]
    fn pending_records_are_not_reannounced() {
        let store = Arc::new(MemoryEntityStore::new());
        store.create(Entity::new("person", json!({})));
        let poller = poller(&store, Recorder::new(Delivery::Delivered));

        let batch = poller.poll_once().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(poller.poll_once().unwrap().is_empty());

        poller.reset_dirty_flag(&batch).unwrap();
        assert_eq!(poller.pending_count(), 0);
        assert!(poller.poll_once().unwrap().is_empty());
    }

    #[test]
    fn modified_while_pending_stays_dirty() {
        let store = Arc::new(MemoryEntityStore::new());
        let id = store.create(Entity::new("person", json!({"v": 1})));
        let poller = poller(&store, Recorder::new(Delivery::Delivered));

        let batch = poller.poll_once().unwrap();
        let key = batch[0].key().unwrap();
        assert_eq!(key.local_id, id);
        store.update(&key, json!({"v": 2})).unwrap();

        poller.reset_dirty_flag(&batch).unwrap();
        let again = poller.poll_once().unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].body, json!({"v": 2}));
    }

    #[test]
    fn inbound_records_are_not_announced() {
        let store = Arc::new(MemoryEntityStore::new());
        let remote = Entity::new("person", json!({})).with_global_id(GlobalId::generate());
        store.apply_insert_or_update(&remote).unwrap();

        let poller = poller(&store, Recorder::new(Delivery::Delivered));
        assert_eq!(poller.tick().unwrap(), 0);
    }

    #[test]
    fn sync_now_and_stop() {
        let store = Arc::new(MemoryEntityStore::new());
        let ticks = Arc::new(AtomicUsize::new(0));
        let listener = {
            let ticks = Arc::clone(&ticks);
            move |_: &[Entity]| {
                ticks.fetch_add(1, Ordering::SeqCst);
                Delivery::Delivered
            }
        };
        let poller = Arc::new(UpdatePoller::new(
            Arc::clone(&store) as Arc<dyn EntityStore>,
            Arc::new(listener),
            PollerConfig::new(Duration::from_secs(60)),
        ));

        let handle = poller.spawn("poller-test").unwrap();
        thread::sleep(Duration::from_millis(50));
        store.create(Entity::new("person", json!({})));
        poller.sync_now();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        let start = Instant::now();
        poller.stop_polling();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(poller.is_stopped());
    }
}
