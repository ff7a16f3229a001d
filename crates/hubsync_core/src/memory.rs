//! In-memory reference store.

use crate::clock::unix_millis;
use crate::error::{StoreError, StoreResult};
use crate::store::{ApplyOutcome, EntityStore};
use hubsync_protocol::{Entity, EntityKey, EntityKind, GlobalId, LocalId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

/// An [`EntityStore`] kept entirely in memory.
///
/// Local writes (`create`, `update`, `delete`) mark records dirty; inbound
/// writes through the `EntityStore` methods store them clean. Deleted
/// records that were ever shared stay behind as tombstones so a stale
/// update cannot resurrect them.
///
/// # Example
///
/// ```
/// use hubsync_core::{EntityStore, MemoryEntityStore};
/// use hubsync_core::protocol::Entity;
/// use serde_json::json;
///
/// let store = MemoryEntityStore::new();
/// store.create(Entity::new("person", json!({"name": "Ada"})));
/// assert_eq!(store.dirty_entities().unwrap().len(), 1);
/// ```
#[derive(Default)]
pub struct MemoryEntityStore {
    inner: RwLock<Inner>,
    rejected_kinds: RwLock<HashSet<EntityKind>>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<EntityKey, Entity>,
    by_global: HashMap<(EntityKind, GlobalId), LocalId>,
    next_local_id: u64,
}

impl Inner {
    fn allocate(&mut self) -> LocalId {
        self.next_local_id += 1;
        LocalId(self.next_local_id)
    }

    fn key_of(&self, kind: &EntityKind, global_id: &GlobalId) -> Option<EntityKey> {
        self.by_global
            .get(&(kind.clone(), global_id.clone()))
            .map(|&local_id| EntityKey {
                kind: kind.clone(),
                local_id,
            })
    }

    fn global_of(&self, kind: &EntityKind, local_id: LocalId) -> Option<GlobalId> {
        let key = EntityKey {
            kind: kind.clone(),
            local_id,
        };
        self.records
            .get(&key)
            .and_then(|e| e.valid_global_id().cloned())
    }

    /// Maps the references of an inbound record onto local ids.
    fn localize(&self, entity: &mut Entity) {
        for reference in &mut entity.references {
            reference.local_id = reference
                .global_id
                .as_ref()
                .and_then(|gid| self.key_of(&reference.kind, gid))
                .map(|key| key.local_id);
        }
    }
}

fn next_modified(previous: u64) -> u64 {
    unix_millis().max(previous + 1)
}

impl MemoryEntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a locally created record and marks it dirty.
    ///
    /// Keeps the record's `modified_at` if set, otherwise stamps it now.
    pub fn create(&self, mut entity: Entity) -> LocalId {
        let mut inner = self.inner.write();
        let local_id = inner.allocate();

        entity.local_id = Some(local_id);
        entity.dirty = true;
        entity.deleted = false;
        if entity.modified_at == 0 {
            entity.modified_at = unix_millis();
        }
        if let Some(gid) = entity.valid_global_id().cloned() {
            inner.by_global.insert((entity.kind.clone(), gid), local_id);
        }

        let key = EntityKey {
            kind: entity.kind.clone(),
            local_id,
        };
        inner.records.insert(key, entity);
        local_id
    }

    /// Replaces the body of a local record and marks it dirty.
    pub fn update(&self, key: &EntityKey, body: serde_json::Value) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(key)
            .filter(|e| !e.deleted)
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", key.kind, key.local_id)))?;

        record.body = body;
        record.dirty = true;
        record.modified_at = next_modified(record.modified_at);
        Ok(())
    }

    /// Deletes a local record.
    ///
    /// A record that was never shared is dropped outright; otherwise it
    /// becomes a dirty tombstone so the deletion propagates.
    pub fn delete(&self, key: &EntityKey) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let shared = match inner.records.get(key) {
            Some(record) if !record.deleted => record.valid_global_id().is_some(),
            _ => return Err(StoreError::NotFound(format!("{}#{}", key.kind, key.local_id))),
        };

        if !shared {
            inner.records.remove(key);
            return Ok(());
        }

        if let Some(record) = inner.records.get_mut(key) {
            record.deleted = true;
            record.dirty = true;
            record.modified_at = next_modified(record.modified_at);
        }
        Ok(())
    }

    /// Returns a copy of a record, tombstones included.
    pub fn get(&self, key: &EntityKey) -> Option<Entity> {
        self.inner.read().records.get(key).cloned()
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|e| !e.deleted)
            .count()
    }

    /// Returns true if the store holds no live records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every inbound write of `kind` fail with `StoreError::Rejected`.
    pub fn reject_kind(&self, kind: impl Into<EntityKind>) {
        self.rejected_kinds.write().insert(kind.into());
    }
}

impl EntityStore for MemoryEntityStore {
    fn dirty_entities(&self) -> StoreResult<Vec<Entity>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|e| e.dirty)
            .cloned()
            .collect())
    }

    fn all_entities(&self) -> StoreResult<Vec<Entity>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|e| !e.deleted)
            .cloned()
            .collect())
    }

    fn find(&self, kind: &EntityKind, global_id: &GlobalId) -> StoreResult<Option<Entity>> {
        let inner = self.inner.read();
        Ok(inner
            .key_of(kind, global_id)
            .and_then(|key| inner.records.get(&key).cloned()))
    }

    fn resolve_global_ids(&self, entities: &mut [Entity]) -> StoreResult<()> {
        let inner = self.inner.read();
        for entity in entities.iter_mut() {
            for reference in &mut entity.references {
                if reference.is_resolved() {
                    continue;
                }
                if let Some(local_id) = reference.local_id {
                    reference.global_id = inner.global_of(&reference.kind, local_id);
                }
            }
        }
        Ok(())
    }

    fn assign_global_id(&self, entity: &mut Entity) -> StoreResult<GlobalId> {
        if let Some(gid) = entity.valid_global_id() {
            return Ok(gid.clone());
        }

        let key = entity
            .key()
            .ok_or_else(|| StoreError::Rejected("record has no local id".into()))?;

        let mut inner = self.inner.write();
        let existing = inner
            .records
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", key.kind, key.local_id)))?
            .valid_global_id()
            .cloned();

        let gid = match existing {
            Some(gid) => gid,
            None => {
                let gid = GlobalId::generate();
                if let Some(record) = inner.records.get_mut(&key) {
                    record.global_id = Some(gid.clone());
                }
                inner
                    .by_global
                    .insert((key.kind.clone(), gid.clone()), key.local_id);
                gid
            }
        };

        entity.global_id = Some(gid.clone());
        Ok(gid)
    }

    fn apply_insert_or_update(&self, entity: &Entity) -> StoreResult<ApplyOutcome> {
        if self.rejected_kinds.read().contains(&entity.kind) {
            return Err(StoreError::Rejected(format!("kind {} is read-only", entity.kind)));
        }
        let gid = entity
            .valid_global_id()
            .cloned()
            .ok_or_else(|| StoreError::Rejected("record has no global id".into()))?;

        let mut inner = self.inner.write();
        let mut incoming = entity.clone();
        inner.localize(&mut incoming);
        incoming.dirty = false;
        incoming.deleted = false;

        match inner.key_of(&entity.kind, &gid) {
            Some(key) => {
                incoming.local_id = Some(key.local_id);
                inner.records.insert(key, incoming);
                Ok(ApplyOutcome::Updated)
            }
            None => {
                let local_id = inner.allocate();
                incoming.local_id = Some(local_id);
                inner.by_global.insert((entity.kind.clone(), gid), local_id);
                inner.records.insert(
                    EntityKey {
                        kind: entity.kind.clone(),
                        local_id,
                    },
                    incoming,
                );
                Ok(ApplyOutcome::Inserted)
            }
        }
    }

    fn apply_delete(&self, entity: &Entity) -> StoreResult<ApplyOutcome> {
        if self.rejected_kinds.read().contains(&entity.kind) {
            return Err(StoreError::Rejected(format!("kind {} is read-only", entity.kind)));
        }
        let Some(gid) = entity.valid_global_id() else {
            return Ok(ApplyOutcome::Ignored);
        };

        let mut inner = self.inner.write();
        let Some(key) = inner.key_of(&entity.kind, gid) else {
            return Ok(ApplyOutcome::Ignored);
        };

        match inner.records.get_mut(&key) {
            Some(record) if !record.deleted => {
                record.deleted = true;
                record.dirty = false;
                record.modified_at = entity.modified_at.max(record.modified_at);
                Ok(ApplyOutcome::Deleted)
            }
            _ => Ok(ApplyOutcome::Ignored),
        }
    }

    fn clear_dirty(&self, entities: &[Entity]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for entity in entities {
            let Some(key) = entity.key() else { continue };
            if let Some(record) = inner.records.get_mut(&key) {
                if record.modified_at == entity.modified_at && record.deleted == entity.deleted {
                    record.dirty = false;
                }
            }
        }
        Ok(())
    }
}
