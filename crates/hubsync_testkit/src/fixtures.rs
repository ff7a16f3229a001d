//! Entity fixtures and store helpers.

use hubsync_core::protocol::{Entity, EntityRef, GlobalId, LocalId};
use hubsync_core::{EntityStore, MemoryEntityStore};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A person record with no global id yet.
pub fn person(name: &str) -> Entity {
    Entity::new("person", json!({ "name": name }))
}

/// A community record with no global id yet.
pub fn community(name: &str) -> Entity {
    Entity::new("community", json!({ "name": name }))
}

/// A person who belongs to the community stored under `community`.
pub fn member(name: &str, community: LocalId) -> Entity {
    person(name).with_reference(EntityRef::local("community", "community", community))
}

/// A record as it would arrive from another device.
pub fn remote(kind: &str, name: &str, modified_at: u64) -> Entity {
    Entity::new(kind, json!({ "name": name }))
        .with_global_id(GlobalId::generate())
        .with_modified_at(modified_at)
}

/// A fresh shared store.
pub fn store() -> Arc<MemoryEntityStore> {
    Arc::new(MemoryEntityStore::new())
}

/// A store holding `count` clean person records that already have global
/// ids, as after a completed sync.
pub fn seeded_store(count: usize) -> Arc<MemoryEntityStore> {
    let store = store();
    for n in 0..count {
        store
            .apply_insert_or_update(&remote("person", &format!("seed-{n}"), 1))
            .expect("seed record");
    }
    store
}

/// The global ids of every live record in `store`.
pub fn global_ids(store: &dyn EntityStore) -> BTreeSet<String> {
    store
        .all_entities()
        .expect("list records")
        .iter()
        .filter_map(|e| e.valid_global_id().map(|gid| gid.as_str().to_string()))
        .collect()
}

/// The `name` fields of every live record in `store`, sorted.
pub fn names(store: &dyn EntityStore) -> Vec<String> {
    let mut names: Vec<String> = store
        .all_entities()
        .expect("list records")
        .iter()
        .filter_map(|e| e.body.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_is_clean() {
        let store = seeded_store(3);
        assert_eq!(store.len(), 3);
        assert!(store.dirty_entities().unwrap().is_empty());
        assert_eq!(global_ids(store.as_ref()).len(), 3);
        assert_eq!(names(store.as_ref()), vec!["seed-0", "seed-1", "seed-2"]);
    }

    #[test]
    fn member_references_community() {
        let store = store();
        let id = store.create(community("Oak Street"));
        let entity = member("Ada", id);
        assert_eq!(entity.references[0].local_id, Some(id));
        assert!(!entity.references[0].is_resolved());
    }
}
