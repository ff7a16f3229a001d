//! An in-process network implementing the transport contracts.
//!
//! Every node gets two addresses, `{node}/server` and `{node}/client`,
//! matching the two listener roles. Frames travel over std channels and
//! go through the real length-prefixed encoding.

use hubsync_core::protocol::{encode_frame, read_frame};
use hubsync_core::{
    Connection, ConnectionListener, ConnectionType, Connector, ListenerRole, PeerAddress,
    SyncError, SyncResult, Timeouts, Transport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const BACKLOG: usize = 64;

/// Address of `node`'s listener for `role`.
pub fn memory_address(node: &str, role: ListenerRole) -> PeerAddress {
    let suffix = match role {
        ListenerRole::Server => "server",
        ListenerRole::Client => "client",
    };
    PeerAddress::new(ConnectionType::Loopback, format!("{node}/{suffix}"))
}

#[derive(Default)]
struct Inner {
    endpoints: Mutex<HashMap<String, (u64, SyncSender<MemoryConnection>)>>,
    unreachable: Mutex<HashSet<String>>,
    latency: Mutex<HashMap<String, Duration>>,
    attempts: Mutex<HashMap<String, usize>>,
    next_binding: AtomicU64,
}

/// A shared in-memory network.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
    timeouts: Timeouts,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Creates a network with short test timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(
            Timeouts::new()
                .with_accept(Duration::from_millis(20))
                .with_read(Duration::from_secs(2))
                .with_connect(Duration::from_secs(1)),
        )
    }

    /// Creates a network whose listeners and connections use `timeouts`.
    pub fn with_timeouts(timeouts: Timeouts) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            timeouts,
        }
    }

    /// Returns the transport for `node`.
    pub fn transport(&self, node: &str) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            node: node.to_string(),
        }
    }

    /// Makes every connect to `address` fail (or succeed again).
    pub fn set_unreachable(&self, address: &PeerAddress, unreachable: bool) {
        let mut set = self.inner.unreachable.lock();
        if unreachable {
            set.insert(address.address.clone());
        } else {
            set.remove(&address.address);
        }
    }

    /// Delays every connect to `address` by `delay`.
    pub fn set_latency(&self, address: &PeerAddress, delay: Duration) {
        self.inner
            .latency
            .lock()
            .insert(address.address.clone(), delay);
    }

    /// Number of connects attempted to `address`, failed ones included.
    pub fn connect_attempts(&self, address: &PeerAddress) -> usize {
        self.inner
            .attempts
            .lock()
            .get(&address.address)
            .copied()
            .unwrap_or(0)
    }

    /// Returns true while a listener is bound at `address`.
    pub fn is_bound(&self, address: &PeerAddress) -> bool {
        self.inner.endpoints.lock().contains_key(&address.address)
    }

    fn bind(&self, address: &PeerAddress) -> SyncResult<(u64, Receiver<MemoryConnection>)> {
        let mut endpoints = self.inner.endpoints.lock();
        if endpoints.contains_key(&address.address) {
            return Err(SyncError::Transport(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{address} already bound"),
            )));
        }
        let binding = self.inner.next_binding.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(BACKLOG);
        endpoints.insert(address.address.clone(), (binding, tx));
        Ok((binding, rx))
    }

    fn unbind(&self, address: &PeerAddress, binding: u64) {
        let mut endpoints = self.inner.endpoints.lock();
        if endpoints.get(&address.address).map(|(b, _)| *b) == Some(binding) {
            endpoints.remove(&address.address);
        }
    }

    fn dial(&self, from: &str, address: &PeerAddress) -> SyncResult<MemoryConnection> {
        *self
            .inner
            .attempts
            .lock()
            .entry(address.address.clone())
            .or_insert(0) += 1;

        let delay = self.inner.latency.lock().get(&address.address).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        if self.inner.unreachable.lock().contains(&address.address) {
            return Err(refused(address));
        }

        let endpoint = self
            .inner
            .endpoints
            .lock()
            .get(&address.address)
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| refused(address))?;

        let (out_tx, out_rx) = mpsc::channel();
        let (in_tx, in_rx) = mpsc::channel();
        let local = MemoryConnection::open(address.clone(), out_tx, in_rx, self.timeouts.read);
        let accepted = MemoryConnection::open(
            memory_address(from, ListenerRole::Client),
            in_tx,
            out_rx,
            self.timeouts.read,
        );

        match endpoint.try_send(accepted) {
            Ok(()) => Ok(local),
            Err(TrySendError::Full(_)) => Err(SyncError::Timeout),
            Err(TrySendError::Disconnected(_)) => Err(refused(address)),
        }
    }
}

fn refused(address: &PeerAddress) -> SyncError {
    SyncError::Transport(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("{address} unreachable"),
    ))
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    node: String,
}

impl MemoryTransport {
    /// The node name.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The network this transport belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Loopback
    }

    fn listener(&self, role: ListenerRole) -> SyncResult<Box<dyn ConnectionListener>> {
        Ok(Box::new(MemoryListener {
            network: self.network.clone(),
            address: memory_address(&self.node, role),
            binding: None,
        }))
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            network: self.network.clone(),
            node: self.node.clone(),
        })
    }

    fn server_address(&self, host: &str) -> PeerAddress {
        memory_address(host, ListenerRole::Server)
    }
}

/// One end of an in-memory exchange.
pub struct MemoryConnection {
    remote: PeerAddress,
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    read_timeout: Duration,
}

impl MemoryConnection {
    fn open(
        remote: PeerAddress,
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            tx: Some(tx),
            rx,
            read_timeout,
        }
    }
}

impl Connection for MemoryConnection {
    fn connect(&mut self) -> SyncResult<()> {
        if self.tx.is_some() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    fn send_frame(&mut self, payload: &[u8]) -> SyncResult<()> {
        let tx = self.tx.as_ref().ok_or(SyncError::NotConnected)?;
        let frame = encode_frame(payload)?;
        tx.send(frame.to_vec()).map_err(|_| {
            SyncError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
        })
    }

    fn receive_frame(&mut self) -> SyncResult<Option<Vec<u8>>> {
        if self.tx.is_none() {
            return Err(SyncError::NotConnected);
        }
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(read_frame(&mut frame.as_slice())?),
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }

    fn remote_address(&self) -> PeerAddress {
        self.remote.clone()
    }
}

/// Listener bound to a node address on a [`MemoryNetwork`].
pub struct MemoryListener {
    network: MemoryNetwork,
    address: PeerAddress,
    binding: Option<(u64, Receiver<MemoryConnection>)>,
}

impl ConnectionListener for MemoryListener {
    fn initialize(&mut self) -> SyncResult<()> {
        if self.binding.is_none() {
            self.binding = Some(self.network.bind(&self.address)?);
        }
        Ok(())
    }

    fn accept(&mut self) -> SyncResult<Box<dyn Connection>> {
        let (_, queue) = self.binding.as_ref().ok_or(SyncError::NotConnected)?;
        match queue.recv_timeout(self.network.timeouts.accept) {
            Ok(connection) => Ok(Box::new(connection)),
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::NotConnected),
        }
    }

    fn close(&mut self) {
        if let Some((binding, _)) = self.binding.take() {
            self.network.unbind(&self.address, binding);
        }
    }

    fn local_address(&self) -> Option<PeerAddress> {
        self.binding.as_ref().map(|_| self.address.clone())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Dials other nodes on a [`MemoryNetwork`].
pub struct MemoryConnector {
    network: MemoryNetwork,
    node: String,
}

impl Connector for MemoryConnector {
    fn connect(&self, address: &PeerAddress) -> SyncResult<Box<dyn Connection>> {
        Ok(Box::new(self.network.dial(&self.node, address)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_core::protocol::{Request, Response};

    #[test]
    fn exchange_between_nodes() {
        let network = MemoryNetwork::new();
        let mut listener = network.transport("hub").listener(ListenerRole::Server).unwrap();
        listener.initialize().unwrap();

        let address = network.transport("phone").server_address("hub");
        let mut outbound = network.transport("phone").connector().connect(&address).unwrap();
        outbound.send_request(&Request::handshake("phone")).unwrap();

        let mut inbound = listener.accept().unwrap();
        assert_eq!(
            inbound.remote_address(),
            memory_address("phone", ListenerRole::Client)
        );
        let request = inbound.receive_request().unwrap().unwrap();
        assert_eq!(request.sender_id, "phone");
        inbound.send_response(&Response::default()).unwrap();
        inbound.close();

        assert!(outbound.receive_response().unwrap().is_some());
        assert!(outbound.receive_response().unwrap().is_none());
    }

    #[test]
    fn unreachable_and_unbound_refuse() {
        let network = MemoryNetwork::new();
        let connector = network.transport("hub").connector();
        let target = memory_address("phone", ListenerRole::Client);

        assert!(connector.connect(&target).is_err());

        let mut listener = network.transport("phone").listener(ListenerRole::Client).unwrap();
        listener.initialize().unwrap();
        assert!(connector.connect(&target).is_ok());

        network.set_unreachable(&target, true);
        assert!(connector.connect(&target).is_err());
        assert_eq!(network.connect_attempts(&target), 3);

        listener.close();
        assert!(!network.is_bound(&target));
    }

    #[test]
    fn double_bind_fails() {
        let network = MemoryNetwork::new();
        let transport = network.transport("hub");
        let mut first = transport.listener(ListenerRole::Server).unwrap();
        first.initialize().unwrap();
        let mut second = transport.listener(ListenerRole::Server).unwrap();
        assert!(second.initialize().is_err());
        assert!(matches!(first.accept(), Err(SyncError::Timeout)));
    }
}
