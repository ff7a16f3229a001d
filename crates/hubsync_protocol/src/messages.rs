//! Protocol messages.
//!
//! Two shapes travel on the wire:
//! - [`Request`]: client → server, either a HANDSHAKE announcing the
//!   sender or an UPDATE carrying the sender's changed records.
//! - [`Response`]: server → client, either the full snapshot answering a
//!   handshake or one peer's forwarded update.

use crate::entity::Entity;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of request sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Announce the sender and ask for a full snapshot.
    Handshake,
    /// Deliver locally changed records.
    Update,
}

impl RequestType {
    /// Wire name of the request type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Handshake => "HANDSHAKE",
            RequestType::Update => "UPDATE",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> ProtocolResult<Self> {
        match name {
            "HANDSHAKE" => Ok(RequestType::Handshake),
            "UPDATE" => Ok(RequestType::Update),
            other => Err(ProtocolError::UnknownRequestType(other.to_string())),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    request_type: Option<&'static str>,
    sender_id: &'a str,
    entities: &'a [Entity],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn {
    #[serde(rename = "type", default)]
    request_type: Option<String>,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    entities: Vec<Entity>,
}

/// A request from a client to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request kind.
    pub request_type: RequestType,
    /// Unique id of the sending device.
    pub sender_id: String,
    /// Changed records; empty for a bare handshake.
    pub entities: Vec<Entity>,
}

impl Request {
    /// Creates a handshake request.
    pub fn handshake(sender_id: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Handshake,
            sender_id: sender_id.into(),
            entities: Vec::new(),
        }
    }

    /// Creates an update request carrying a batch.
    pub fn update(sender_id: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self {
            request_type: RequestType::Update,
            sender_id: sender_id.into(),
            entities,
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let wire = WireOut {
            request_type: Some(self.request_type.as_str()),
            sender_id: &self.sender_id,
            entities: &self.entities,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let wire: WireIn = serde_json::from_slice(bytes)?;

        let request_type = wire
            .request_type
            .as_deref()
            .ok_or(ProtocolError::MissingField("type"))
            .and_then(RequestType::parse)?;

        let sender_id = wire
            .sender_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ProtocolError::MissingField("senderId"))?;

        Ok(Self {
            request_type,
            sender_id,
            entities: wire.entities,
        })
    }
}

/// A response from the server to a client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Snapshot or forwarded batch.
    pub entities: Vec<Entity>,
}

impl Response {
    /// Creates a response carrying the given records.
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// Encodes to JSON bytes.
    ///
    /// Responses carry an empty `senderId` and no `type`.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let wire = WireOut {
            request_type: None,
            sender_id: "",
            entities: &self.entities,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let wire: WireIn = serde_json::from_slice(bytes)?;
        Ok(Self {
            entities: wire.entities,
        })
    }
}
