//! Applying inbound batches to the local store.

use crate::store::{ApplyOutcome, EntityStore};
use hubsync_protocol::{ConflictPolicy, Entity};
use tracing::{debug, warn};

/// Counts of what happened while applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Records created.
    pub inserted: usize,
    /// Records overwritten.
    pub updated: usize,
    /// Records turned into tombstones.
    pub deleted: usize,
    /// Records left alone (stale, duplicate delete, unknown delete).
    pub skipped: usize,
    /// Records the store refused or that could not be identified.
    pub failed: usize,
}

impl ApplySummary {
    /// Number of records that changed the store.
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Total records processed.
    pub fn total(&self) -> usize {
        self.changed() + self.skipped + self.failed
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Deleted => self.deleted += 1,
            ApplyOutcome::Ignored => self.skipped += 1,
        }
    }
}

/// Applies a batch record by record.
///
/// A record that fails is logged and counted; the rest of the batch still
/// applies. Existing records are updated, unknown ones inserted, and a
/// delete of an unknown id is a logged no-op, so the same batch can be
/// applied any number of times.
pub fn apply_batch(
    store: &dyn EntityStore,
    entities: &[Entity],
    policy: ConflictPolicy,
) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for entity in entities {
        let Some(gid) = entity.valid_global_id() else {
            warn!(kind = %entity.kind, "dropping inbound record without a global id");
            summary.failed += 1;
            continue;
        };

        let stored = match store.find(&entity.kind, gid) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(kind = %entity.kind, id = %gid, error = %e, "lookup failed");
                summary.failed += 1;
                continue;
            }
        };

        if !policy.accepts(stored.as_ref(), entity) {
            debug!(kind = %entity.kind, id = %gid, "skipping stale record");
            summary.skipped += 1;
            continue;
        }

        let result = if entity.deleted {
            if stored.is_none() {
                warn!(kind = %entity.kind, id = %gid, "delete of unknown record ignored");
            }
            store.apply_delete(entity)
        } else {
            store.apply_insert_or_update(entity)
        };

        match result {
            Ok(outcome) => summary.record(outcome),
            Err(e) => {
                warn!(kind = %entity.kind, id = %gid, error = %e, "failed to apply record");
                summary.failed += 1;
            }
        }
    }

    summary
}
