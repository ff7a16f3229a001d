//! Hub and spokes converging over the in-memory network.

use hubsync_core::protocol::ConflictPolicy;
use hubsync_core::{
    apply_batch, EntityStore, ListenerRole, MemoryEntityStore, PollerConfig, Timeouts,
};
use hubsync_engine::{ClientConfig, ClientState, SyncClient};
use hubsync_server::{ServerConfig, SyncServer};
use hubsync_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn poller() -> PollerConfig {
    PollerConfig::new(Duration::from_millis(20))
}

fn hub(network: &MemoryNetwork, store: &Arc<MemoryEntityStore>) -> SyncServer {
    let server = SyncServer::new(
        Arc::clone(store) as Arc<dyn EntityStore>,
        Arc::new(network.transport("hub")),
        ServerConfig::default()
            .with_poller(poller())
            .with_shutdown_grace(Duration::from_secs(2)),
    );
    server.start().unwrap();
    server
}

fn spoke(network: &MemoryNetwork, node: &str, store: &Arc<MemoryEntityStore>) -> SyncClient {
    SyncClient::new(
        Arc::clone(store) as Arc<dyn EntityStore>,
        Arc::new(network.transport(node)),
        memory_address("hub", ListenerRole::Server),
        ClientConfig::new(node)
            .with_poller(poller())
            .with_shutdown_grace(Duration::from_secs(2)),
    )
}

fn has_name(store: &MemoryEntityStore, name: &str) -> bool {
    names(store).iter().any(|n| n == name)
}

#[test]
fn start_applies_the_hub_snapshot() {
    let network = MemoryNetwork::new();
    let hub_store = seeded_store(3);
    let server = hub(&network, &hub_store);

    let phone_store = store();
    let phone = spoke(&network, "phone", &phone_store);
    assert_eq!(phone.start().unwrap(), 3);
    assert_eq!(phone.state(), ClientState::Running);

    assert_eq!(names(phone_store.as_ref()), names(hub_store.as_ref()));
    assert_eq!(global_ids(phone_store.as_ref()), global_ids(hub_store.as_ref()));
    // Snapshot records arrive clean and are not pushed back.
    assert!(phone_store.dirty_entities().unwrap().is_empty());
    assert_eq!(server.peers().len(), 1);

    phone.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn local_change_reaches_hub_and_other_spokes_once() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let server = hub(&network, &hub_store);

    let a_store = store();
    let b_store = store();
    let a = spoke(&network, "a", &a_store);
    let b = spoke(&network, "b", &b_store);
    a.start().unwrap();
    b.start().unwrap();

    a_store.create(person("Ada"));
    a.sync_now();

    assert!(wait_until(WAIT, || has_name(&hub_store, "Ada")));
    assert!(wait_until(WAIT, || has_name(&b_store, "Ada")));
    assert!(wait_until(WAIT, || a_store.dirty_entities().unwrap().is_empty()));
    assert!(server.wait_idle(WAIT));

    // The sender keeps exactly its own copy and everyone agrees on its id.
    assert_eq!(names(a_store.as_ref()), vec!["Ada"]);
    assert_eq!(global_ids(a_store.as_ref()), global_ids(hub_store.as_ref()));
    assert_eq!(global_ids(b_store.as_ref()), global_ids(hub_store.as_ref()));
    // Applied records are not re-announced by the hub or the other spoke.
    assert!(hub_store.dirty_entities().unwrap().is_empty());
    assert!(b_store.dirty_entities().unwrap().is_empty());

    a.stop(true).unwrap();
    b.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn hub_change_reaches_every_spoke() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let server = hub(&network, &hub_store);

    let a_store = store();
    let b_store = store();
    let a = spoke(&network, "a", &a_store);
    let b = spoke(&network, "b", &b_store);
    a.start().unwrap();
    b.start().unwrap();

    let rivers = hub_store.create(community("Rivers"));
    hub_store.create(member("Grace", rivers));
    server.sync_now();

    for spoke_store in [&a_store, &b_store] {
        assert!(wait_until(WAIT, || names(spoke_store.as_ref()) == vec!["Grace", "Rivers"]));
    }
    assert!(wait_until(WAIT, || hub_store.dirty_entities().unwrap().is_empty()));
    assert_eq!(global_ids(a_store.as_ref()), global_ids(hub_store.as_ref()));

    a.stop(true).unwrap();
    b.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn concurrent_edits_converge() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let server = hub(&network, &hub_store);

    let a_store = store();
    let b_store = store();
    let a = spoke(&network, "a", &a_store);
    let b = spoke(&network, "b", &b_store);
    a.start().unwrap();
    b.start().unwrap();

    for n in 0..5 {
        a_store.create(person(&format!("a-{n}")));
        b_store.create(person(&format!("b-{n}")));
        hub_store.create(person(&format!("hub-{n}")));
    }

    let converged = wait_until(WAIT, || {
        let expected = global_ids(hub_store.as_ref());
        expected.len() == 15
            && global_ids(a_store.as_ref()) == expected
            && global_ids(b_store.as_ref()) == expected
    });
    assert!(converged);
    assert_eq!(names(a_store.as_ref()), names(b_store.as_ref()));

    a.stop(true).unwrap();
    b.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn deletes_propagate_as_tombstones() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let server = hub(&network, &hub_store);

    let a_store = store();
    let b_store = store();
    let a = spoke(&network, "a", &a_store);
    let b = spoke(&network, "b", &b_store);
    a.start().unwrap();
    b.start().unwrap();

    let id = a_store.create(person("Temp"));
    assert!(wait_until(WAIT, || has_name(&b_store, "Temp")));
    assert!(wait_until(WAIT, || a_store.dirty_entities().unwrap().is_empty()));

    let key = a_store
        .all_entities()
        .unwrap()
        .into_iter()
        .find(|e| e.local_id == Some(id))
        .and_then(|e| e.key())
        .unwrap();
    a_store.delete(&key).unwrap();

    assert!(wait_until(WAIT, || !has_name(&hub_store, "Temp")));
    assert!(wait_until(WAIT, || !has_name(&b_store, "Temp")));

    a.stop(true).unwrap();
    b.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn offline_changes_are_pushed_once_the_hub_returns() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let first = hub(&network, &hub_store);

    let phone_store = store();
    let phone = spoke(&network, "phone", &phone_store);
    phone.start().unwrap();
    first.stop(true).unwrap();

    phone_store.create(person("Offline"));
    let server = memory_address("hub", ListenerRole::Server);
    assert!(wait_until(WAIT, || network.connect_attempts(&server) >= 3));
    assert_eq!(phone_store.dirty_entities().unwrap().len(), 1);
    assert!(!has_name(&hub_store, "Offline"));

    let second = hub(&network, &hub_store);
    assert!(wait_until(WAIT, || has_name(&hub_store, "Offline")));
    assert!(wait_until(WAIT, || phone_store.dirty_entities().unwrap().is_empty()));

    phone.stop(true).unwrap();
    second.stop(true).unwrap();
}

#[test]
fn stopping_a_client_is_prompt() {
    // Long read timeouts must not hold up the receiver on stop.
    let network = MemoryNetwork::with_timeouts(
        Timeouts::new()
            .with_accept(Duration::from_millis(50))
            .with_read(Duration::from_secs(30)),
    );
    let hub_store = store();
    let server = hub(&network, &hub_store);
    let phone = spoke(&network, "phone", &store());
    phone.start().unwrap();

    let started = Instant::now();
    phone.stop(true).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(phone.state(), ClientState::Stopped);
    assert!(!network.is_bound(&memory_address("phone", ListenerRole::Client)));

    // A stopped client can start again.
    phone.start().unwrap();
    assert!(phone.is_running());
    phone.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn starting_twice_is_rejected() {
    let network = MemoryNetwork::new();
    let hub_store = store();
    let server = hub(&network, &hub_store);
    let phone = spoke(&network, "phone", &store());

    phone.start().unwrap();
    assert!(phone.start().is_err());
    phone.stop(true).unwrap();
    server.stop(true).unwrap();
}

fn snapshot(store: &MemoryEntityStore) -> Vec<(String, String, String, bool)> {
    let mut rows: Vec<(String, String, String, bool)> = store
        .all_entities()
        .unwrap()
        .into_iter()
        .map(|e| {
            (
                e.global_id.map(|g| g.as_str().to_string()).unwrap_or_default(),
                e.kind.to_string(),
                e.body.to_string(),
                e.deleted,
            )
        })
        .collect();
    rows.sort();
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn applying_a_batch_twice_matches_applying_it_once(batch in remote_batch_strategy(12)) {
        let once = store();
        apply_batch(once.as_ref(), &batch, ConflictPolicy::LastWriterWins);

        let twice = store();
        apply_batch(twice.as_ref(), &batch, ConflictPolicy::LastWriterWins);
        let again = apply_batch(twice.as_ref(), &batch, ConflictPolicy::LastWriterWins);

        prop_assert_eq!(again.failed, 0);
        prop_assert_eq!(snapshot(&once), snapshot(&twice));
        prop_assert!(twice.dirty_entities().unwrap().is_empty());
    }
}
