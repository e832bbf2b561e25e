//! Task distribution protocol
//!
//! Four tags make up the whole vocabulary between the coordinator (rank 0)
//! and its workers. Payloads are MessagePack (rmp-serde) so tasks and results
//! can be any serde type.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Worker
//!     |                              |
//!     |<------- READY ---------------|   once, on worker start
//!     |-------- START(i, task) ----->|
//!     |<------- DONE(i, result) -----|   doubles as "ready again"
//!     |-------- START(j, task) ----->|
//!     |<------- DONE(j, result) -----|
//!     |-------- EXIT --------------->|   no tasks left
//!     |<------- EXIT ----------------|   shutdown acknowledgement
//! ```
//!
//! # Message Framing
//!
//! On byte streams each message is prefixed with a 4-byte length field
//! (little-endian u32) covering the tag byte and the payload:
//!
//! ```text
//! [4 bytes: length][1 byte: tag][N bytes: MessagePack payload]
//! ```

use crate::error::{DistributeError, TransportError};
use crate::transport::Rank;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Exchanged during the TCP handshake. Coordinator and workers must match.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame accepted from the wire (64 MiB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Message tag
///
/// Discriminants follow the declaration order READY, DONE, EXIT, START and
/// are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tag {
    /// Worker → Coordinator: idle, give me work or let me stop
    Ready = 0,
    /// Worker → Coordinator: result for the most recently assigned task
    Done = 1,
    /// Coordinator → Worker: terminate. Worker → Coordinator: terminated.
    Exit = 2,
    /// Coordinator → Worker: execute the carried task
    Start = 3,
}

impl Tag {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Tag {
    type Error = TransportError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Tag::Ready),
            1 => Ok(Tag::Done),
            2 => Ok(Tag::Exit),
            3 => Ok(Tag::Start),
            other => Err(TransportError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Ready => "READY",
            Tag::Done => "DONE",
            Tag::Exit => "EXIT",
            Tag::Start => "START",
        };
        f.write_str(name)
    }
}

/// A received message together with its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// START payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment<T> {
    /// Position of the task in the coordinator's task list
    pub index: u64,
    pub task: T,
}

/// DONE payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion<R> {
    /// Index echoed from the matching `Assignment`
    pub index: u64,
    pub result: R,
}

pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DistributeError> {
    Ok(rmp_serde::to_vec(value)?)
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DistributeError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Frame a tagged payload for a byte stream
pub fn encode_frame(tag: Tag, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let body_len = payload.len() + 1;
    if body_len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body_len));
    }

    let mut framed = Vec::with_capacity(4 + body_len);
    framed.extend_from_slice(&(body_len as u32).to_le_bytes());
    framed.push(tag.code());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Decode one frame from the front of `buf`
///
/// Returns (tag, payload, bytes_consumed).
pub fn decode_frame(buf: &[u8]) -> Result<(Tag, Vec<u8>, usize), TransportError> {
    if buf.len() < 4 {
        return Err(TransportError::Truncated { needed: 4, got: buf.len() });
    }

    let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if body_len == 0 {
        return Err(TransportError::Truncated { needed: 5, got: 4 });
    }
    if body_len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body_len));
    }
    if buf.len() < 4 + body_len {
        return Err(TransportError::Truncated {
            needed: 4 + body_len,
            got: buf.len(),
        });
    }

    let tag = Tag::try_from(buf[4])?;
    Ok((tag, buf[5..4 + body_len].to_vec(), 4 + body_len))
}

/// Read one complete frame from a stream
pub async fn read_frame<S>(stream: &mut S) -> Result<(Tag, Vec<u8>), TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;

    let body_len = u32::from_le_bytes(len_buf) as usize;
    if body_len == 0 {
        return Err(TransportError::Truncated { needed: 1, got: 0 });
    }
    if body_len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body_len));
    }

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;

    let tag = Tag::try_from(body[0])?;
    body.remove(0);
    Ok((tag, body))
}

/// Write one frame and flush it
pub async fn write_frame<S>(stream: &mut S, tag: Tag, payload: &[u8]) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    let framed = encode_frame(tag, payload)?;
    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}
