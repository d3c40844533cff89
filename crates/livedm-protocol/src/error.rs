//! Error types for the protocol layer.
//!
//! Two families live here and they must not be confused:
//!
//! - [`ProtocolError`] means the *byte stream* is broken (bad header,
//!   impossible length, unknown compression). The connection can't be
//!   trusted any more, so a session treats it as fatal.
//! - [`MalformedMessageError`] means one *message* inside an otherwise
//!   healthy stream doesn't have the shape its `cmd` promises. Only that
//!   message is dropped.

use crate::ProtocolVersion;

/// Errors in the wire framing. Fatal to the connection that produced them.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes than a header or than the header's declared length.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// The header-length field isn't the fixed 16.
    #[error("bad header length {0}, expected 16")]
    BadHeaderLength(u16),

    /// The total-length field is smaller than the header itself.
    #[error("bad total length {0}")]
    BadTotalLength(u32),

    /// The protocol-version field holds a value this codec doesn't know.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// A frame inside a decompressed batch is itself compressed.
    #[error("compressed frame nested inside a {0:?} batch")]
    NestedCompression(ProtocolVersion),

    /// The compressed body couldn't be inflated.
    #[error("{version:?} decompression failed: {source}")]
    Decompress {
        version: ProtocolVersion,
        #[source]
        source: std::io::Error,
    },

    /// The batch inflates past the configured ceiling.
    #[error("decompressed batch exceeds {limit} bytes")]
    DecompressedTooLarge { limit: usize },

    /// The body doesn't fit the 32-bit total-length field.
    #[error("frame body of {0} bytes is too large")]
    FrameTooLarge(usize),

    /// Serializing an outgoing JSON body failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Compressing an outgoing batch failed.
    #[error("compress failed: {0}")]
    Compress(#[source] std::io::Error),
}

/// One message that can't be turned into an event.
///
/// Reported and skipped; the stream it came from keeps going.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMessageError {
    /// A heartbeat reply whose body is shorter than the 4-byte counter.
    #[error("popularity body is {len} bytes, expected 4")]
    ShortPopularity { len: usize },

    /// A command body that isn't valid UTF-8 JSON.
    #[error("command body is not JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A known command whose fields don't match its schema.
    #[error("{cmd}: {reason}")]
    Field { cmd: &'static str, reason: String },
}
