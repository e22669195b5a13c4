//! Protocol message definitions and framing for Snapsync
//!
//! Uses rkyv for zero-copy serialization of messages

use crate::NetworkError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rkyv::{Archive, Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Message types in the Snapsync protocol
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Message {
    /// Initial handshake from client
    Hello { version: u32 },

    /// Server response to handshake
    HelloAck { version: u32, session_id: u64 },

    /// Full snapshot replacing the server's copy
    FullHeartbeat { snapshot: Vec<u8> },

    /// Compressed patch plus hex checksum of the resulting snapshot
    Heartbeat { patch: Vec<u8>, checksum: String },

    /// Liveness signal while sync is disabled; never answered
    Tick(u64),

    /// Server accepted the snapshot; checksum of its copy
    Ack { checksum: u64 },

    /// Patched snapshot did not hash to what the client claimed
    ChecksumMismatch { expected: String, actual: String },

    /// Request could not be processed
    Error(String),
}

impl Message {
    /// Whether the server answers this message
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Message::Tick(_))
    }

    /// Size of the variable-length payload carried by this message
    pub fn payload_len(&self) -> usize {
        match self {
            Message::FullHeartbeat { snapshot } => snapshot.len(),
            Message::Heartbeat { patch, checksum } => patch.len() + checksum.len(),
            Message::ChecksumMismatch { expected, actual } => expected.len() + actual.len(),
            Message::Error(text) => text.len(),
            _ => 0,
        }
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Bytes, NetworkError> {
        let bytes = rkyv::to_bytes::<_, 256>(self)
            .map_err(|e| NetworkError::ProtocolError(format!("Serialization failed: {e}")))?;
        Ok(Bytes::from(bytes.to_vec()))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut aligned = rkyv::AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = rkyv::check_archived_root::<Self>(&aligned)
            .map_err(|e| NetworkError::ProtocolError(format!("Validation failed: {e}")))?;

        let deserialized: Self = archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|e| NetworkError::ProtocolError(format!("Deserialization failed: {e:?}")))?;

        Ok(deserialized)
    }
}

/// Frame encoder/decoder for message stream
pub struct FramedCodec;

impl FramedCodec {
    /// Encode a message with length prefix
    pub fn encode(msg: &Message, buf: &mut BytesMut) -> Result<(), NetworkError> {
        let payload = msg.to_bytes()?;

        if payload.len() > MAX_FRAME_LEN {
            return Err(NetworkError::ProtocolError(format!(
                "Message too large: {} bytes",
                payload.len()
            )));
        }

        // 4-byte length prefix (big-endian)
        buf.reserve(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);

        Ok(())
    }

    /// Decode a message from buffer
    /// Returns Some(message) if a complete message is available, None if more data needed
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Message>, NetworkError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        // Peek at length without consuming
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_LEN {
            return Err(NetworkError::ProtocolError(format!(
                "Frame of {length} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }

        if buf.len() < 4 + length {
            buf.reserve(4 + length - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let frame = buf.split_to(length);

        Message::from_bytes(&frame).map(Some)
    }
}

/// Read the next message, or `None` on a clean close between frames
pub async fn read_message<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Message>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(msg) = FramedCodec::decode(buf)? {
            return Ok(Some(msg));
        }

        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(NetworkError::ConnectionFailed(
                "Connection closed mid-frame".to_string(),
            ));
        }
    }
}

/// Write one framed message; returns the number of bytes written
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<usize, NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    FramedCodec::encode(msg, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(buf.len())
}

/// Message statistics for debugging/monitoring
#[derive(Debug, Default, Clone)]
pub struct MessageStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_rtt_micros: Option<u64>,
}

impl MessageStats {
    /// Byte counters track payload only; framing overhead is constant per message
    pub fn record_sent(&mut self, msg: &Message) {
        self.messages_sent += 1;
        self.bytes_sent += msg.payload_len() as u64;
    }

    pub fn record_received(&mut self, msg: &Message) {
        self.messages_received += 1;
        self.bytes_received += msg.payload_len() as u64;
    }

    /// Update RTT from a completed request/response exchange
    pub fn update_rtt(&mut self, elapsed: Duration) {
        self.last_rtt_micros = Some(elapsed.as_micros() as u64);
    }
}
