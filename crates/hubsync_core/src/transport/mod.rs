//! Transport layer abstraction.
//!
//! The engine only needs a reliable ordered byte stream per exchange. A
//! [`Transport`] hands out listeners for the two roles and a [`Connector`]
//! for outbound connections; everything above it is transport agnostic.

mod tcp;

pub use tcp::{TcpConnection, TcpConnectionListener, TcpConnector, TcpTransport, TcpTransportConfig};

use crate::error::SyncResult;
use hubsync_protocol::{read_frame, write_frame, Request, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// The kind of link a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// WiFi-Direct group socket.
    WifiDirect,
    /// Bluetooth RFCOMM channel.
    Bluetooth,
    /// Plain TCP.
    Tcp,
    /// In-process channel, for tests.
    Loopback,
}

impl ConnectionType {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::WifiDirect => "wifi_direct",
            ConnectionType::Bluetooth => "bluetooth",
            ConnectionType::Tcp => "tcp",
            ConnectionType::Loopback => "loopback",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to reach a peer: a socket address, device handle or channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Link type the address belongs to.
    pub connection_type: ConnectionType,
    /// Transport-specific address string.
    pub address: String,
}

impl PeerAddress {
    /// Creates an address.
    pub fn new(connection_type: ConnectionType, address: impl Into<String>) -> Self {
        Self {
            connection_type,
            address: address.into(),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.connection_type, self.address)
    }
}

/// Which side a listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    /// The hub, accepting handshakes and updates.
    Server,
    /// A spoke, accepting pushes from the hub.
    Client,
}

/// A bidirectional, ordered, reliable byte channel.
///
/// One connection carries one exchange and is then closed.
pub trait Connection: Send {
    /// Opens the channel if it is not open yet.
    fn connect(&mut self) -> SyncResult<()>;

    /// Returns true while the channel is open.
    fn is_connected(&self) -> bool;

    /// Writes one frame and blocks until it is flushed.
    fn send_frame(&mut self, payload: &[u8]) -> SyncResult<()>;

    /// Reads one frame. `Ok(None)` means the peer closed cleanly; an
    /// expired read timeout is `SyncError::Timeout`.
    fn receive_frame(&mut self) -> SyncResult<Option<Vec<u8>>>;

    /// Closes the channel. Closing twice is harmless.
    fn close(&mut self);

    /// Address at which the remote side accepts connections.
    fn remote_address(&self) -> PeerAddress;

    /// Sends a request.
    fn send_request(&mut self, request: &Request) -> SyncResult<()> {
        let payload = request.encode()?;
        self.send_frame(&payload)
    }

    /// Sends a response.
    fn send_response(&mut self, response: &Response) -> SyncResult<()> {
        let payload = response.encode()?;
        self.send_frame(&payload)
    }

    /// Receives a request, or `None` on clean close.
    fn receive_request(&mut self) -> SyncResult<Option<Request>> {
        match self.receive_frame()? {
            Some(payload) => Ok(Some(Request::decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Receives a response, or `None` on clean close.
    fn receive_response(&mut self) -> SyncResult<Option<Response>> {
        match self.receive_frame()? {
            Some(payload) => Ok(Some(Response::decode(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Accepts inbound connections.
pub trait ConnectionListener: Send {
    /// Binds and starts listening.
    fn initialize(&mut self) -> SyncResult<()>;

    /// Waits up to the accept timeout for a connection. An expired wait is
    /// `SyncError::Timeout` and means "nothing this tick".
    fn accept(&mut self) -> SyncResult<Box<dyn Connection>>;

    /// Stops listening.
    fn close(&mut self);

    /// The bound address, once initialized.
    fn local_address(&self) -> Option<PeerAddress>;
}

/// Opens outbound connections.
pub trait Connector: Send + Sync {
    /// Connects to `address`.
    fn connect(&self, address: &PeerAddress) -> SyncResult<Box<dyn Connection>>;
}

/// A link technology: listeners for both roles plus a connector.
pub trait Transport: Send + Sync {
    /// The link type this transport provides.
    fn connection_type(&self) -> ConnectionType;

    /// Creates an uninitialized listener for `role`.
    fn listener(&self, role: ListenerRole) -> SyncResult<Box<dyn ConnectionListener>>;

    /// Returns the connector used for outbound connections.
    fn connector(&self) -> Arc<dyn Connector>;

    /// The address of a server running on `host`.
    fn server_address(&self, host: &str) -> PeerAddress;
}

/// Frames over any blocking stream.
pub(crate) fn send_on<W: Write>(stream: &mut W, payload: &[u8]) -> SyncResult<()> {
    write_frame(stream, payload)?;
    Ok(())
}

pub(crate) fn receive_on<R: Read>(stream: &mut R) -> SyncResult<Option<Vec<u8>>> {
    Ok(read_frame(stream)?)
}
