//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or framing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON for the expected message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Request carried a type this peer does not understand.
    #[error("unknown request type: {0}")]
    UnknownRequestType(String),

    /// A required field was missing or empty.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Frame header announced a payload above the limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the header promised.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// Underlying stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the error came from the byte stream rather than
    /// from the content of a message.
    pub fn is_io(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
