//! Length-prefixed framing.
//!
//! Every message travels as `[u32 big-endian length][payload]`. A reader
//! that hits end-of-stream before the first header byte sees a clean
//! close (`Ok(None)`); end-of-stream anywhere else is a truncated frame.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Write};

/// Size of the length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted on read or write (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes a payload into a single frame.
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Bytes> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Writes one frame and flushes.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> ProtocolResult<()> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` if the stream closed cleanly before a new frame
/// started.
pub fn read_frame<R: Read>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let got = read_up_to(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < FRAME_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: FRAME_HEADER_LEN,
            actual: got,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    let got = read_up_to(reader, &mut payload)?;
    if got < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            actual: got,
        });
    }

    Ok(Some(payload))
}

/// Fills `buf` until it is full or the stream ends; returns bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
