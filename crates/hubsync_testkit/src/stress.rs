//! Polling and concurrency helpers.

use hubsync_core::protocol::EntityKey;
use hubsync_core::MemoryEntityStore;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns the final result.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Result of a concurrent write run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Records created.
    pub created: usize,
    /// Updates applied to existing records.
    pub updated: usize,
    /// Total duration.
    pub duration: Duration,
}

/// Configuration for concurrent local writes.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Writer threads.
    pub threads: usize,
    /// Records each thread creates.
    pub records_per_thread: usize,
    /// Times each record is updated after creation.
    pub updates_per_record: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            records_per_thread: 25,
            updates_per_record: 2,
        }
    }
}

/// Hammers `store` with local creates and updates from several threads,
/// as an application would while a sync session runs.
pub fn concurrent_local_writes(store: &Arc<MemoryEntityStore>, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(store);
            let config = config.clone();
            thread::spawn(move || {
                let mut updated = 0usize;
                for r in 0..config.records_per_thread {
                    let name = format!("writer-{t}-{r}");
                    let local_id = store.create(crate::fixtures::person(&name));
                    let key = EntityKey {
                        kind: "person".into(),
                        local_id,
                    };
                    for v in 0..config.updates_per_record {
                        if store.update(&key, json!({ "name": name, "v": v })).is_ok() {
                            updated += 1;
                        }
                    }
                }
                updated
            })
        })
        .collect();

    let updated: usize = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread"))
        .sum();

    StressResult {
        created: config.threads * config.records_per_thread,
        updated,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_core::EntityStore;

    #[test]
    fn wait_until_times_out() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(30), || false));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(wait_until(Duration::from_millis(30), || true));
    }

    #[test]
    fn concurrent_writes_all_land() {
        let store = Arc::new(MemoryEntityStore::new());
        let result = concurrent_local_writes(
            &store,
            &StressConfig {
                threads: 3,
                records_per_thread: 10,
                updates_per_record: 1,
            },
        );
        assert_eq!(result.created, 30);
        assert_eq!(result.updated, 30);
        assert_eq!(store.dirty_entities().unwrap().len(), 30);
    }
}
