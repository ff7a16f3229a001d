//! Entity envelope exchanged between peers.
//!
//! The engine never interprets record contents. A store hands it an
//! [`Entity`] whose `body` is the store's own serialization of the row,
//! tagged with a `kind` so the receiving store can route it back to the
//! right table. Identity travels as a [`GlobalId`]; the store-local
//! [`LocalId`] and the dirty flag never leave the device.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store-local identifier of a record.
///
/// Only meaningful on the device that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a record that is stable across all devices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(String);

impl GlobalId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns true if the identifier can be used on the wire.
    ///
    /// Blank identifiers are treated the same as absent ones.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing tag naming the concrete record type (`"person"`, `"community"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates a kind tag.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for EntityKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

/// Key identifying a record inside one store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Record type.
    pub kind: EntityKind,
    /// Store-local id.
    pub local_id: LocalId,
}

/// A foreign-key reference from one record to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Name of the referencing field (`"community"`, `"member"`, ...).
    pub field: String,
    /// Kind of the referenced record.
    pub kind: EntityKind,
    /// Local id of the target on this device, if known.
    #[serde(skip)]
    pub local_id: Option<LocalId>,
    /// Global id of the target, once it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<GlobalId>,
}

impl EntityRef {
    /// Creates a reference to a local record whose global id is not yet known.
    pub fn local(field: impl Into<String>, kind: impl Into<EntityKind>, local_id: LocalId) -> Self {
        Self {
            field: field.into(),
            kind: kind.into(),
            local_id: Some(local_id),
            global_id: None,
        }
    }

    /// Returns true if the target's global id is known.
    pub fn is_resolved(&self) -> bool {
        self.global_id.as_ref().is_some_and(GlobalId::is_valid)
    }
}

/// A record as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Routing tag.
    pub kind: EntityKind,
    /// Store-local id; never serialized.
    #[serde(skip)]
    pub local_id: Option<LocalId>,
    /// Cross-device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<GlobalId>,
    /// Modified locally and not yet propagated; never serialized.
    #[serde(skip)]
    pub dirty: bool,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted: bool,
    /// Last modification time in Unix milliseconds.
    #[serde(default)]
    pub modified_at: u64,
    /// Foreign keys to other records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<EntityRef>,
    /// Store-defined serialization of the record.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Entity {
    /// Creates a record of the given kind with the given body.
    pub fn new(kind: impl Into<EntityKind>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            local_id: None,
            global_id: None,
            dirty: false,
            deleted: false,
            modified_at: 0,
            references: Vec::new(),
            body,
        }
    }

    /// Sets the local id.
    pub fn with_local_id(mut self, local_id: LocalId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    /// Sets the global id.
    pub fn with_global_id(mut self, global_id: GlobalId) -> Self {
        self.global_id = Some(global_id);
        self
    }

    /// Adds a reference.
    pub fn with_reference(mut self, reference: EntityRef) -> Self {
        self.references.push(reference);
        self
    }

    /// Sets the modification time.
    pub fn with_modified_at(mut self, modified_at: u64) -> Self {
        self.modified_at = modified_at;
        self
    }

    /// Returns the store key, if the record has a local id.
    pub fn key(&self) -> Option<EntityKey> {
        self.local_id.map(|local_id| EntityKey {
            kind: self.kind.clone(),
            local_id,
        })
    }

    /// Returns the global id if it is present and valid.
    pub fn valid_global_id(&self) -> Option<&GlobalId> {
        self.global_id.as_ref().filter(|id| id.is_valid())
    }

    /// Returns true if the record and everything it references have
    /// valid global ids, i.e. it can be sent to another device.
    pub fn is_transmittable(&self) -> bool {
        self.valid_global_id().is_some() && self.references.iter().all(EntityRef::is_resolved)
    }

    /// Iterates over references whose target has no global id yet.
    pub fn unresolved_references(&self) -> impl Iterator<Item = &EntityRef> {
        self.references.iter().filter(|r| !r.is_resolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = GlobalId::generate();
        let b = GlobalId::generate();
        assert!(a.is_valid());
        assert_ne!(a, b);
        assert!(!GlobalId::new("").is_valid());
        assert!(!GlobalId::new("   ").is_valid());
    }

    #[test]
    fn kind_from_owned_string() {
        let kind = String::from("person");
        let entity = Entity::new(kind, json!({}));
        assert_eq!(entity.kind, EntityKind::from("person"));
    }

    #[test]
    fn transmittable_requires_all_ids() {
        let community = Entity::new("community", json!({"name": "chess"}))
            .with_local_id(LocalId(1));
        assert!(!community.is_transmittable());

        let community = community.with_global_id(GlobalId::generate());
        assert!(community.is_transmittable());

        let membership = Entity::new("membership", json!({}))
            .with_global_id(GlobalId::generate())
            .with_reference(EntityRef::local("community", "community", LocalId(1)));
        assert!(!membership.is_transmittable());
        assert_eq!(membership.unresolved_references().count(), 1);
    }

    #[test]
    fn local_state_is_not_serialized() {
        let mut entity = Entity::new("person", json!({"name": "Ada"}))
            .with_local_id(LocalId(7))
            .with_global_id(GlobalId::new("g-1"))
            .with_modified_at(42);
        entity.dirty = true;

        let text = serde_json::to_string(&entity).unwrap();
        assert!(text.contains("\"kind\":\"person\""));
        assert!(text.contains("\"globalId\":\"g-1\""));
        assert!(text.contains("\"modifiedAt\":42"));
        assert!(!text.contains("localId"));
        assert!(!text.contains("dirty"));

        let decoded: Entity = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.local_id, None);
        assert!(!decoded.dirty);
        assert_eq!(decoded.body, json!({"name": "Ada"}));
    }

    #[test]
    fn reference_local_id_stays_home() {
        let mut reference = EntityRef::local("owner", "person", LocalId(3));
        reference.global_id = Some(GlobalId::new("p-3"));

        let text = serde_json::to_string(&reference).unwrap();
        let decoded: EntityRef = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.local_id, None);
        assert_eq!(decoded.global_id, Some(GlobalId::new("p-3")));
        assert!(decoded.is_resolved());
    }
}
