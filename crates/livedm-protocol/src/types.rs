//! Core wire types: identifiers, operation codes, versions and frames.
//!
//! Every frame on the wire starts with the same 16-byte header:
//!
//! ```text
//! offset  size  field
//! 0       4     total length (header + body), big-endian
//! 4       2     header length, always 16
//! 6       2     protocol version (body encoding)
//! 8       4     operation code
//! 12      4     sequence id
//! 16      ..    body
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Size of the fixed frame header in bytes.
pub const HEADER_LENGTH: u16 = 16;

/// A live room identifier.
///
/// `#[serde(transparent)]` keeps it a plain number in JSON, which is what
/// the auth body expects for `roomid`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RoomId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// How a frame's body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ProtocolVersion {
    /// Plain JSON.
    Normal = 0,
    /// Plain body. Used for client-sent control frames and heartbeat replies.
    Heartbeat = 1,
    /// zlib-compressed batch of frames.
    Deflate = 2,
    /// brotli-compressed batch of frames.
    Brotli = 3,
}

impl ProtocolVersion {
    /// Whether the body is a compressed batch that must be expanded.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Deflate | Self::Brotli)
    }

    /// The raw 16-bit wire value.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Deflate),
            3 => Ok(Self::Brotli),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

/// Frame operation codes.
///
/// Unlike the version field, an unrecognized operation is not an error:
/// the server adds operations over time and a client should skip what it
/// doesn't understand. Those decode to [`Operation::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Handshake,
    HandshakeReply,
    /// Client → server keep-alive.
    Heartbeat,
    /// Server → client; body is the 4-byte popularity counter.
    HeartbeatReply,
    SendMsg,
    /// Server → client; body is a JSON command (possibly batched).
    SendMsgReply,
    DisconnectReply,
    /// Client → server; body is the JSON auth parameters.
    Auth,
    /// Server → client; body is `{"code": 0}` on success.
    AuthReply,
    Raw,
    ProtoReady,
    ProtoFinish,
    ChangeRoom,
    ChangeRoomReply,
    Register,
    RegisterReply,
    Unregister,
    UnregisterReply,
    Unknown(u32),
}

impl Operation {
    /// The raw 32-bit wire value.
    pub fn code(self) -> u32 {
        match self {
            Self::Handshake => 0,
            Self::HandshakeReply => 1,
            Self::Heartbeat => 2,
            Self::HeartbeatReply => 3,
            Self::SendMsg => 4,
            Self::SendMsgReply => 5,
            Self::DisconnectReply => 6,
            Self::Auth => 7,
            Self::AuthReply => 8,
            Self::Raw => 9,
            Self::ProtoReady => 10,
            Self::ProtoFinish => 11,
            Self::ChangeRoom => 12,
            Self::ChangeRoomReply => 13,
            Self::Register => 14,
            Self::RegisterReply => 15,
            Self::Unregister => 16,
            Self::UnregisterReply => 17,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u32> for Operation {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Handshake,
            1 => Self::HandshakeReply,
            2 => Self::Heartbeat,
            3 => Self::HeartbeatReply,
            4 => Self::SendMsg,
            5 => Self::SendMsgReply,
            6 => Self::DisconnectReply,
            7 => Self::Auth,
            8 => Self::AuthReply,
            9 => Self::Raw,
            10 => Self::ProtoReady,
            11 => Self::ProtoFinish,
            12 => Self::ChangeRoom,
            13 => Self::ChangeRoomReply,
            14 => Self::Register,
            15 => Self::RegisterReply,
            16 => Self::Unregister,
            17 => Self::UnregisterReply,
            other => Self::Unknown(other),
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus body, in bytes.
    pub total_length: u32,
    /// Always [`HEADER_LENGTH`] for a frame that decoded successfully.
    pub header_length: u16,
    pub version: ProtocolVersion,
    pub operation: Operation,
    /// Not used for correlation by this protocol; kept for logging.
    pub sequence: u32,
}

/// One logical frame: header plus uncompressed body.
///
/// Frames produced by [`decode`](crate::decode) never carry a compressed
/// version. Batches are already expanded into their inner frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

impl Frame {
    /// Shorthand for `header.operation`.
    pub fn operation(&self) -> Operation {
        self.header.operation
    }

    /// Shorthand for `header.version`.
    pub fn version(&self) -> ProtocolVersion {
        self.header.version
    }

    /// The frame body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
