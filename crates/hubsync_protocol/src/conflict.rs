//! Conflict policy for inbound records.
//!
//! Delivery is at-least-once and fan-out order across peers is not
//! guaranteed, so the receiver decides per record whether an inbound
//! version replaces the stored one.

use crate::entity::Entity;

/// Decides whether an inbound record overwrites the stored version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Newest `modified_at` wins; ties re-apply so duplicates stay idempotent.
    #[default]
    LastWriterWins,
    /// Whatever arrives last is applied.
    ArrivalOrder,
}

impl ConflictPolicy {
    /// Returns true if `incoming` should replace `stored`.
    ///
    /// A record with nothing stored locally is always accepted.
    pub fn accepts(&self, stored: Option<&Entity>, incoming: &Entity) -> bool {
        match (self, stored) {
            (_, None) => true,
            (ConflictPolicy::ArrivalOrder, Some(_)) => true,
            (ConflictPolicy::LastWriterWins, Some(stored)) => {
                incoming.modified_at >= stored.modified_at
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: u64) -> Entity {
        Entity::new("person", json!({})).with_modified_at(ms)
    }

    #[test]
    fn last_writer_wins() {
        let policy = ConflictPolicy::LastWriterWins;
        assert!(policy.accepts(None, &at(1)));
        assert!(policy.accepts(Some(&at(10)), &at(11)));
        assert!(policy.accepts(Some(&at(10)), &at(10)));
        assert!(!policy.accepts(Some(&at(10)), &at(9)));
    }

    #[test]
    fn arrival_order_always_applies() {
        let policy = ConflictPolicy::ArrivalOrder;
        assert!(policy.accepts(Some(&at(10)), &at(1)));
    }
}
