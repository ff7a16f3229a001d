//! Plain TCP transport over std sockets.

use super::{
    receive_on, send_on, Connection, ConnectionListener, ConnectionType, Connector, ListenerRole,
    PeerAddress, Transport,
};
use crate::config::Timeouts;
use crate::error::{SyncError, SyncResult};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTransportConfig {
    /// Interface both listeners bind to.
    pub bind_host: String,
    /// Port the server listens on.
    pub server_port: u16,
    /// Port clients listen on for server pushes.
    pub client_port: u16,
    /// Accept, read and connect timeouts.
    pub timeouts: Timeouts,
}

impl TcpTransportConfig {
    /// Creates a configuration with the default ports.
    pub fn new() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            server_port: 8888,
            client_port: 8889,
            timeouts: Timeouts::default(),
        }
    }

    /// Sets the bind interface.
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Sets the server port.
    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    /// Sets the client callback port.
    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    /// Sets the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn port(&self, role: ListenerRole) -> u16 {
        match role {
            ListenerRole::Server => self.server_port,
            ListenerRole::Client => self.client_port,
        }
    }

    /// Port the other role listens on.
    fn remote_port(&self, role: ListenerRole) -> u16 {
        match role {
            ListenerRole::Server => self.client_port,
            ListenerRole::Client => self.server_port,
        }
    }
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Transport`] over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Creates a transport.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }
}

impl Transport for TcpTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Tcp
    }

    fn listener(&self, role: ListenerRole) -> SyncResult<Box<dyn ConnectionListener>> {
        Ok(Box::new(TcpConnectionListener::new(
            format!("{}:{}", self.config.bind_host, self.config.port(role)),
            self.config.remote_port(role),
            self.config.timeouts,
        )))
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(TcpConnector::new(self.config.timeouts))
    }

    fn server_address(&self, host: &str) -> PeerAddress {
        PeerAddress::new(
            ConnectionType::Tcp,
            format!("{host}:{}", self.config.server_port),
        )
    }
}

/// One TCP exchange.
#[derive(Debug)]
pub struct TcpConnection {
    remote: PeerAddress,
    stream: Option<TcpStream>,
    timeouts: Timeouts,
}

impl TcpConnection {
    /// Creates an unconnected connection to `remote`.
    pub fn new(remote: PeerAddress, timeouts: Timeouts) -> Self {
        Self {
            remote,
            stream: None,
            timeouts,
        }
    }

    fn accepted(stream: TcpStream, remote: PeerAddress, timeouts: Timeouts) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(timeouts.read))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            remote,
            stream: Some(stream),
            timeouts,
        })
    }

    fn stream(&mut self) -> SyncResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(SyncError::NotConnected)
    }
}

impl Connection for TcpConnection {
    fn connect(&mut self) -> SyncResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut last_err = None;
        for addr in self.remote.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeouts.read))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", self.remote.address),
                )
            })
            .into())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send_frame(&mut self, payload: &[u8]) -> SyncResult<()> {
        send_on(self.stream()?, payload)
    }

    fn receive_frame(&mut self) -> SyncResult<Option<Vec<u8>>> {
        receive_on(self.stream()?)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn remote_address(&self) -> PeerAddress {
        self.remote.clone()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accepts TCP connections with a bounded wait.
///
/// The socket is non-blocking and polled until the accept timeout, so the
/// owning loop regains control every tick.
#[derive(Debug)]
pub struct TcpConnectionListener {
    bind: String,
    remote_port: u16,
    timeouts: Timeouts,
    listener: Option<TcpListener>,
}

impl TcpConnectionListener {
    /// Creates a listener for `bind`. Accepted peers are reached back on
    /// their IP at `remote_port`.
    pub fn new(bind: impl Into<String>, remote_port: u16, timeouts: Timeouts) -> Self {
        Self {
            bind: bind.into(),
            remote_port,
            timeouts,
            listener: None,
        }
    }

    fn callback_address(&self, peer: SocketAddr) -> PeerAddress {
        PeerAddress::new(
            ConnectionType::Tcp,
            SocketAddr::new(peer.ip(), self.remote_port).to_string(),
        )
    }
}

impl ConnectionListener for TcpConnectionListener {
    fn initialize(&mut self) -> SyncResult<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.bind).map_err(SyncError::Transport)?;
        listener.set_nonblocking(true).map_err(SyncError::Transport)?;
        tracing::debug!(bind = %self.bind, "tcp listener ready");
        self.listener = Some(listener);
        Ok(())
    }

    fn accept(&mut self) -> SyncResult<Box<dyn Connection>> {
        let deadline = Instant::now() + self.timeouts.accept;
        let listener = self.listener.as_ref().ok_or(SyncError::NotConnected)?;

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let remote = self.callback_address(peer);
                    let connection = TcpConnection::accepted(stream, remote, self.timeouts)
                        .map_err(SyncError::Transport)?;
                    return Ok(Box::new(connection));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SyncError::Timeout);
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(SyncError::Transport(err)),
            }
        }
    }

    fn close(&mut self) {
        self.listener = None;
    }

    fn local_address(&self) -> Option<PeerAddress> {
        let listener = self.listener.as_ref()?;
        let addr = listener.local_addr().ok()?;
        Some(PeerAddress::new(ConnectionType::Tcp, addr.to_string()))
    }
}

/// Opens outbound TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector {
    timeouts: Timeouts,
}

impl TcpConnector {
    /// Creates a connector.
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, address: &PeerAddress) -> SyncResult<Box<dyn Connection>> {
        let mut connection = TcpConnection::new(address.clone(), self.timeouts);
        connection.connect()?;
        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_protocol::{Request, RequestType, Response};

    fn timeouts() -> Timeouts {
        Timeouts::new()
            .with_accept(Duration::from_millis(30))
            .with_read(Duration::from_millis(500))
            .with_connect(Duration::from_millis(500))
    }

    fn bound_listener() -> TcpConnectionListener {
        let mut listener = TcpConnectionListener::new("127.0.0.1:0", 9, timeouts());
        listener.initialize().unwrap();
        listener
    }

    #[test]
    fn accept_times_out() {
        let mut listener = bound_listener();
        let start = Instant::now();
        assert!(matches!(listener.accept(), Err(SyncError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn exchange_over_loopback() {
        let mut listener = bound_listener();
        let address = listener.local_address().unwrap();

        let client = thread::spawn(move || {
            let mut conn = TcpConnector::new(timeouts()).connect(&address).unwrap();
            conn.send_request(&Request::handshake("device-a")).unwrap();
            let response = conn.receive_response().unwrap().unwrap();
            conn.close();
            response
        });

        let mut accepted = loop {
            match listener.accept() {
                Ok(conn) => break conn,
                Err(err) => assert!(err.is_timeout()),
            }
        };
        assert_eq!(accepted.remote_address().address, "127.0.0.1:9");

        let request = accepted.receive_request().unwrap().unwrap();
        assert_eq!(request.request_type, RequestType::Handshake);
        accepted.send_response(&Response::default()).unwrap();
        accepted.close();

        assert!(client.join().unwrap().entities.is_empty());
    }

    #[test]
    fn read_times_out() {
        let mut listener = bound_listener();
        let address = listener.local_address().unwrap();
        let _peer = TcpConnector::new(timeouts()).connect(&address).unwrap();

        let mut accepted = loop {
            if let Ok(conn) = listener.accept() {
                break conn;
            }
        };
        assert!(accepted.receive_frame().unwrap_err().is_timeout());
    }

    #[test]
    fn connect_refused_is_peer_scoped() {
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let address = PeerAddress::new(ConnectionType::Tcp, format!("127.0.0.1:{port}"));
        match TcpConnector::new(timeouts()).connect(&address) {
            Ok(_) => panic!("connected to a closed port"),
            Err(err) => assert!(err.is_peer_scoped()),
        }
    }

    #[test]
    fn transport_addresses() {
        let transport = TcpTransport::new(TcpTransportConfig::default().with_server_port(9000));
        assert_eq!(
            transport.server_address("192.168.49.1").address,
            "192.168.49.1:9000"
        );
        assert_eq!(transport.connection_type(), ConnectionType::Tcp);
    }
}
