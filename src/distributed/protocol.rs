//! Wire protocol between the coordinator and remote worker services
//!
//! Every frame is MessagePack (rmp-serde). MessagePack keeps the full serde
//! data model, so algorithm authors can put enums, options and renamed
//! fields in their queries and answers without protocol changes.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Worker Service
//!     |                              |
//!     |-------- ASSIGN(id) --------->|   build shard for Role::Worker(id)
//!     |<------- READY ---------------|   (or FAILURE with stage = setup)
//!     |                              |
//!     |-- QUERY(view, query) ------->|
//!     |<------- ANSWER --------------|   (or FAILURE with stage = step)
//!     |            ...               |
//!     |-------- STOP --------------->|
//!     |<------- STOPPED -------------|
//! ```
//!
//! At most one QUERY is in flight per connection.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack message]
//! ```

use crate::algorithm::WorkerId;
use crate::worker::Stage;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Coordinator and worker services must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Coordinator → service frame
///
/// `V` and `Q` are the algorithm's worker view and query types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request<V, Q> {
    Assign(AssignMessage),
    Query { view: V, query: Q },
    Stop,
}

impl<V, Q> Request<V, Q> {
    /// Frame name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Assign(_) => "ASSIGN",
            Request::Query { .. } => "QUERY",
            Request::Stop => "STOP",
        }
    }
}

/// Service → coordinator frame, `A` is the answer type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply<A> {
    Ready(ReadyMessage),
    Answer(A),
    Failure(ErrorMessage),
    Stopped,
}

impl<A> Reply<A> {
    /// Frame name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ready(_) => "READY",
            Reply::Answer(_) => "ANSWER",
            Reply::Failure(_) => "FAILURE",
            Reply::Stopped => "STOPPED",
        }
    }
}

/// Worker assignment, first frame on every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Identifier the service's worker takes for this run
    pub worker: WorkerId,
}

/// Shard built, ready for queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMessage {
    pub protocol_version: u32,

    /// Service host identifier
    pub node_id: String,

    pub worker: WorkerId,
}

/// Failure reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub node_id: String,

    /// Setup failures happen before READY, step failures answer a QUERY
    pub stage: Stage,

    /// Error description, full context chain
    pub error: String,
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;
    if msg_bytes.len() > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_bytes.len());
    }

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message<T: DeserializeOwned>(buf: &[u8]) -> Result<(T, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len]).context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read one framed message
pub async fn read_message<T, R>(stream: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes (max 100MB)", msg_len);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    rmp_serde::from_slice(&msg_buf).context("Failed to deserialize message")
}

/// Write one framed message and flush
///
/// The message is serialized before the returned future is first polled, so
/// the future only holds the encoded bytes and `T` need not be `Sync`.
pub fn write_message<'a, T, W>(stream: &'a mut W, msg: &T) -> impl Future<Output = Result<()>> + 'a
where
    T: Serialize,
    W: AsyncWrite + Unpin + 'a,
{
    let framed = serialize_message(msg);
    async move { write_frame(stream, &framed?).await }
}

/// Write an already framed message and flush
pub async fn write_frame<W>(stream: &mut W, framed: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(framed).await.context("Failed to write message")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}
