//! Property-based test generators using proptest.

use hubsync_core::protocol::{Entity, GlobalId};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for entity kinds.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["person", "community", "relationship"]).prop_map(str::to_string)
}

/// Strategy for records as they arrive from a peer: valid global id,
/// arbitrary body, some tombstones.
pub fn remote_entity_strategy() -> impl Strategy<Value = Entity> {
    (
        kind_strategy(),
        "[a-z]{1,12}",
        1u64..1_000,
        prop::bool::weighted(0.1),
    )
        .prop_map(|(kind, name, modified_at, deleted)| {
            let mut entity = Entity::new(kind, json!({ "name": name }))
                .with_global_id(GlobalId::generate())
                .with_modified_at(modified_at);
            entity.deleted = deleted;
            entity
        })
}

/// Strategy for a batch of inbound records, possibly repeating one record
/// at different versions.
pub fn remote_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(remote_entity_strategy(), 0..max).prop_flat_map(|base| {
        let len = base.len();
        let repeats = if len == 0 {
            Just(Vec::new()).boxed()
        } else {
            prop::collection::vec((0..len, 1u64..1_000), 0..len).boxed()
        };
        (Just(base), repeats).prop_map(|(mut batch, repeats)| {
            for (index, modified_at) in repeats {
                let mut again = batch[index].clone();
                again.modified_at = modified_at;
                again.body = json!({ "name": format!("v{modified_at}") });
                batch.push(again);
            }
            batch
        })
    })
}
