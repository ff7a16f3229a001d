//! Serve and join command implementation.

use super::records;
use hubsync_core::protocol::Entity;
use hubsync_core::transport::{TcpTransport, TcpTransportConfig};
use hubsync_core::{EntityStore, MemoryEntityStore, PollerConfig};
use hubsync_engine::{
    load_or_create_unique_id, ClientConfig, ManagerConfig, SyncEvent, SyncManager, TransportEvent,
};
use hubsync_server::ServerConfig;
use serde_json::json;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Which side to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Be the hub.
    Serve,
    /// Join the hub on this host.
    Join(String),
}

/// Everything `serve` and `join` need.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Where the device id lives.
    pub id_file: PathBuf,
    /// Ports and interface.
    pub transport: TcpTransportConfig,
    /// Poller interval for either role.
    pub poll_interval: Duration,
    /// Records to load first.
    pub seed: Option<PathBuf>,
    /// Where to write the store on exit.
    pub dump: Option<PathBuf>,
    /// Run for this long instead of reading stdin.
    pub duration: Option<Duration>,
}

/// Runs one role until stdin closes or the duration passes.
///
/// Each line read from stdin is stored as a `note` record and announced
/// right away.
pub fn run(role: Role, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let unique_id = load_or_create_unique_id(&options.id_file)?;

    let store = Arc::new(MemoryEntityStore::new());
    if let Some(seed) = &options.seed {
        records::load_seed(seed, &store)?;
    }

    let poller = PollerConfig::new(options.poll_interval);
    let config = ManagerConfig::new(unique_id.as_str())
        .with_server(ServerConfig::default().with_poller(poller))
        .with_client(ClientConfig::new(unique_id.as_str()).with_poller(poller));
    let manager = SyncManager::new(
        Arc::clone(&store) as Arc<dyn EntityStore>,
        Arc::new(TcpTransport::new(options.transport.clone())),
        config,
    );
    manager.add_listener(Arc::new(|event: &SyncEvent| {
        tracing::info!(?event, "sync event");
    }));

    let (is_owner, owner_host) = match role {
        Role::Serve => (true, "localhost".to_string()),
        Role::Join(host) => (false, host),
    };
    tracing::info!(id = %unique_id, owner = is_owner, host = %owner_host, "starting");
    manager.handle_transport_event(TransportEvent::GroupFormed {
        is_owner,
        owner_host,
    });
    if !manager.is_sync_active() {
        return Err("sync did not start".into());
    }

    match options.duration {
        Some(duration) => thread::sleep(duration),
        None => read_notes(&store, &manager)?,
    }

    manager.stop_sync(true)?;

    if let Some(dump) = &options.dump {
        records::write_dump(dump, store.as_ref())?;
    }
    let summary = records::summary(store.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn read_notes(store: &MemoryEntityStore, manager: &SyncManager) -> io::Result<()> {
    println!("Type a line to share it, Ctrl-D to stop.");
    for line in io::stdin().lock().lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        store.create(Entity::new("note", json!({ "text": text })));
        manager.sync_now();
    }
    Ok(())
}
