//! One hub and one spoke over real sockets on the loopback interface.

use hubsync_core::transport::{TcpTransport, TcpTransportConfig};
use hubsync_core::{EntityStore, PollerConfig, Timeouts, Transport};
use hubsync_engine::{
    ClientConfig, ManagerConfig, SyncClient, SyncEvent, SyncManager, SyncRole, SyncTarget,
};
use hubsync_server::{ServerConfig, SyncServer};
use hubsync_testkit::prelude::*;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn transport() -> TcpTransport {
    TcpTransport::new(
        TcpTransportConfig::new()
            .with_bind_host("127.0.0.1")
            .with_server_port(free_port())
            .with_client_port(free_port())
            .with_timeouts(
                Timeouts::new()
                    .with_accept(Duration::from_millis(50))
                    .with_read(Duration::from_secs(2)),
            ),
    )
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn hub_and_spoke_sync_over_tcp() {
    // Both roles share the host, so they share one port pair.
    let transport = Arc::new(transport());
    let poller = PollerConfig::new(Duration::from_millis(25));

    let hub_store = seeded_store(2);
    let server = SyncServer::new(
        Arc::clone(&hub_store) as Arc<dyn EntityStore>,
        Arc::clone(&transport) as Arc<dyn Transport>,
        ServerConfig::default().with_poller(poller),
    );
    server.start().unwrap();

    let phone_store = store();
    let phone = SyncClient::new(
        Arc::clone(&phone_store) as Arc<dyn EntityStore>,
        Arc::clone(&transport) as Arc<dyn Transport>,
        transport.server_address("127.0.0.1"),
        ClientConfig::new("phone").with_poller(poller),
    );
    assert_eq!(phone.start().unwrap(), 2);
    assert_eq!(global_ids(phone_store.as_ref()), global_ids(hub_store.as_ref()));

    phone_store.create(person("From phone"));
    assert!(wait_until(WAIT, || names(hub_store.as_ref()).contains(&"From phone".to_string())));

    hub_store.create(person("From hub"));
    assert!(wait_until(WAIT, || names(phone_store.as_ref()).contains(&"From hub".to_string())));
    assert!(wait_until(WAIT, || {
        global_ids(phone_store.as_ref()) == global_ids(hub_store.as_ref())
    }));

    phone.stop(true).unwrap();
    server.stop(true).unwrap();
}

#[test]
fn server_restarts_on_the_same_port_after_a_non_blocking_stop() {
    let events: EventLog<SyncEvent> = EventLog::new();
    let sink = events.clone();
    let manager = SyncManager::new(
        store(),
        Arc::new(transport()),
        ManagerConfig::new("hub").with_stop_timeout(Duration::from_secs(5)),
    );
    manager.add_listener(Arc::new(move |event: &SyncEvent| sink.record(event.clone())));

    for _ in 0..3 {
        manager.start_sync(SyncTarget::Serve).unwrap();
        assert!(manager.stop_sync(false).unwrap());
    }
    manager.start_sync(SyncTarget::Serve).unwrap();
    assert_eq!(manager.active_role(), Some(SyncRole::Server));
    assert_eq!(events.count(|e| matches!(e, SyncEvent::ConnectionFailure(_))), 0);

    manager.stop_sync(true).unwrap();
    assert!(!manager.is_sync_active());
}
