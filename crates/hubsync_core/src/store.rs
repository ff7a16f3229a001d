//! The contract between the sync engine and the local record store.

use crate::error::StoreResult;
use hubsync_protocol::{Entity, EntityKind, GlobalId};

/// What applying an inbound record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record was created.
    Inserted,
    /// An existing record was overwritten.
    Updated,
    /// A record was turned into a tombstone.
    Deleted,
    /// Nothing changed.
    Ignored,
}

/// A local record store the engine synchronizes.
///
/// The engine calls these from several threads at once (poller, request
/// handlers, receiver loop); implementations provide their own locking.
///
/// Inbound application must be idempotent and order tolerant: the same
/// record may arrive more than once, and an update may arrive for an id
/// the store has never seen. Records written through
/// [`apply_insert_or_update`](EntityStore::apply_insert_or_update) and
/// [`apply_delete`](EntityStore::apply_delete) are stored clean so they
/// are not echoed back to the network.
pub trait EntityStore: Send + Sync {
    /// Returns every locally modified record, tombstones included.
    fn dirty_entities(&self) -> StoreResult<Vec<Entity>>;

    /// Returns every live record.
    fn all_entities(&self) -> StoreResult<Vec<Entity>>;

    /// Looks up a record (live or tombstone) by global id.
    fn find(&self, kind: &EntityKind, global_id: &GlobalId) -> StoreResult<Option<Entity>>;

    /// Fills in the global ids of the records' references from their
    /// local ids, where the targets have one.
    fn resolve_global_ids(&self, entities: &mut [Entity]) -> StoreResult<()>;

    /// Gives the record a global id if it lacks one, persists it, and
    /// returns the id.
    fn assign_global_id(&self, entity: &mut Entity) -> StoreResult<GlobalId>;

    /// Inserts the record if its global id is unknown, otherwise
    /// overwrites the stored version.
    fn apply_insert_or_update(&self, entity: &Entity) -> StoreResult<ApplyOutcome>;

    /// Deletes the record with the same global id. Unknown ids are a no-op.
    fn apply_delete(&self, entity: &Entity) -> StoreResult<ApplyOutcome>;

    /// Clears the dirty flag of records that were sent.
    ///
    /// A record modified again after the batch was taken stays dirty.
    fn clear_dirty(&self, entities: &[Entity]) -> StoreResult<()>;
}
