//! Request and response envelopes.
//!
//! Every datagram exchanged between client and server is one envelope.  This
//! module defines the on-wire layout and converts between envelopes and
//! bytes, rejecting short or length-mismatched input.
//!
//! # Wire format
//!
//! All integers are **little-endian**.
//!
//! ```text
//! request : [ len: u32 ][ request_id: i32 ][ op: i32     ][ payload ...                 ]
//! response: [ len: u32 ][ request_id: i32 ][ status: i32 ][ message: str ][ payload ... ]
//! ```
//!
//! `len` counts the whole datagram, itself included.  Both envelopes share a
//! [`HEADER_LEN`]-byte fixed header.

use std::fmt;

use crate::codec::{CodecError, Reader, Writer};

/// Byte length of the fixed header: len(4) + request_id(4) + op/status(4).
pub const HEADER_LEN: usize = 12;

/// Reply sent for a datagram that fails envelope validation.
///
/// Deliberately shorter than [`HEADER_LEN`] so a client never mistakes it
/// for a reply.
pub const MALFORMED_REPLY: &[u8] = b"???";

/// Request id carried by server-pushed callbacks.
pub const CALLBACK_REQUEST_ID: i32 = 0;

/// Outcome class of a response.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 1,
    Fail = 2,
    Error = 3,
    /// Reserved for unsolicited notifications; never a direct reply.
    Callback = 4,
}

impl Status {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => Status::Ok,
            2 => Status::Fail,
            3 => Status::Error,
            4 => Status::Callback,
            _ => return None,
        })
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
            Status::Callback => "CALLBACK",
        };
        f.write_str(name)
    }
}

/// Check the fixed header and embedded length of a raw datagram.
///
/// Returns a reader positioned just after the length field.
fn open_frame(buf: &[u8]) -> Result<Reader<'_>, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            remaining: buf.len(),
        });
    }
    let mut r = Reader::new(buf);
    let declared = r.get_u32()? as usize;
    if declared != buf.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }
    Ok(r)
}

/// Finish a frame whose first four bytes are a length placeholder.
fn seal_frame(mut w: Writer) -> Vec<u8> {
    let len = w.len() as u32;
    w.patch_u32(0, len);
    w.into_bytes()
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A client-to-server call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Chosen by the client; discriminator of the dedup key.
    pub request_id: i32,
    /// Operation code, interpreted by the service.
    pub op: i32,
    /// Operation-specific fields.
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(request_id: i32, op: i32, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            op,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(0)
            .put_i32(self.request_id)
            .put_i32(self.op)
            .put_bytes(&self.payload);
        seal_frame(w)
    }

    /// Parse a request, validating header size and embedded length.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = open_frame(buf)?;
        let request_id = r.get_i32()?;
        let op = r.get_i32()?;
        Ok(Self {
            request_id,
            op,
            payload: r.rest().to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A server-to-client reply or callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Echo of the request id ([`CALLBACK_REQUEST_ID`] for callbacks).
    pub request_id: i32,
    pub status: Status,
    /// Human-readable summary.
    pub message: String,
    /// Operation-specific fields.
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(request_id: i32, status: Status, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Build an unsolicited notification.
    pub fn callback(message: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(CALLBACK_REQUEST_ID, Status::Callback, message).with_payload(payload)
    }

    pub fn is_callback(&self) -> bool {
        self.status == Status::Callback
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(0)
            .put_i32(self.request_id)
            .put_i32(self.status.to_i32())
            .put_str(&self.message)
            .put_bytes(&self.payload);
        seal_frame(w)
    }

    /// Parse a response.
    ///
    /// Fails on short or length-mismatched datagrams and on unknown status
    /// codes; the client treats any such datagram as noise.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = open_frame(buf)?;
        let request_id = r.get_i32()?;
        let raw_status = r.get_i32()?;
        let status = Status::from_i32(raw_status).ok_or(CodecError::UnknownStatus(raw_status))?;
        let message = r.get_str()?;
        Ok(Self {
            request_id,
            status,
            message,
            payload: r.rest().to_vec(),
        })
    }
}
