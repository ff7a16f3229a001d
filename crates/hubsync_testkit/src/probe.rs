//! Stand-ins for remote peers and event recorders.

use crate::network::MemoryNetwork;
use crate::stress::wait_until;
use hubsync_core::protocol::{Entity, Request, Response};
use hubsync_core::{ListenerRole, PeerAddress, StopSignal, SyncError, SyncResult, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A fake client that only listens for server pushes and records them.
pub struct PeerProbe {
    node: String,
    network: MemoryNetwork,
    received: Arc<Mutex<Vec<Response>>>,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl PeerProbe {
    /// Binds `node`'s client address and starts recording.
    pub fn bind(network: &MemoryNetwork, node: &str) -> Self {
        let mut listener = network
            .transport(node)
            .listener(ListenerRole::Client)
            .expect("create probe listener");
        listener.initialize().expect("bind probe listener");

        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = StopSignal::new();
        let handle = {
            let received = Arc::clone(&received);
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("probe-{node}"))
                .spawn(move || {
                    while !stop.is_stopped() {
                        let mut connection = match listener.accept() {
                            Ok(connection) => connection,
                            Err(SyncError::Timeout) => continue,
                            Err(_) => break,
                        };
                        while let Ok(Some(response)) = connection.receive_response() {
                            received.lock().push(response);
                        }
                        connection.close();
                    }
                    listener.close();
                })
                .expect("spawn probe")
        };

        Self {
            node: node.to_string(),
            network: network.clone(),
            received,
            stop,
            handle: Some(handle),
        }
    }

    /// The node name this probe answers for.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Performs a bare handshake with the server on `server` as this node.
    pub fn handshake(&self, server: &str) -> SyncResult<Response> {
        exchange(&self.network, &self.node, server, &Request::handshake(&self.node))
    }

    /// Sends an UPDATE to the server on `server` as this node.
    pub fn send_update(&self, server: &str, entities: Vec<Entity>) -> SyncResult<()> {
        let request = Request::update(&self.node, entities);
        let transport = self.network.transport(&self.node);
        let mut connection = transport
            .connector()
            .connect(&transport.server_address(server))?;
        connection.send_request(&request)?;
        // The server closes after handling; wait for that so callers see
        // the update applied.
        let _ = connection.receive_frame();
        connection.close();
        Ok(())
    }

    /// Every response received so far.
    pub fn responses(&self) -> Vec<Response> {
        self.received.lock().clone()
    }

    /// Every entity received so far, across responses.
    pub fn entities(&self) -> Vec<Entity> {
        self.received
            .lock()
            .iter()
            .flat_map(|r| r.entities.iter().cloned())
            .collect()
    }

    /// Waits until at least `count` responses arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.received.lock().len() >= count)
    }

    /// Stops recording and unbinds.
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeerProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends `request` from `node` to the server on `server` and returns the
/// reply.
pub fn exchange(
    network: &MemoryNetwork,
    node: &str,
    server: &str,
    request: &Request,
) -> SyncResult<Response> {
    let transport = network.transport(node);
    let address: PeerAddress = transport.server_address(server);
    let mut connection = transport.connector().connect(&address)?;
    connection.send_request(request)?;
    let response = connection.receive_response()?;
    connection.close();
    response.ok_or(SyncError::NotConnected)
}

/// A thread-safe, cloneable event recorder.
#[derive(Clone)]
pub struct EventLog<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> EventLog<T> {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: T) {
        self.events.lock().push(event);
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    /// Waits until some recorded event matches `predicate`.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&T) -> bool) -> bool {
        wait_until(timeout, || self.events.lock().iter().any(&predicate))
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}
