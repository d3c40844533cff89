//! Wire protocol for livedm.
//!
//! This crate knows how the live-room server frames its bytes and what the
//! messages inside those frames mean. It does no I/O:
//!
//! - **Types** ([`Frame`], [`Operation`], [`ProtocolVersion`], [`RoomId`])
//!   describe the 16-byte header and its fields.
//! - **Codec** ([`encode`], [`decode`]) converts between frames and bytes,
//!   expanding zlib and brotli batches on the way in.
//! - **Messages** ([`DecodedMessage`]) interpret a frame body by its
//!   operation: a popularity counter or a JSON command.
//! - **Commands** ([`classify`], [`TypedEvent`]) map JSON commands onto
//!   typed payloads from [`models`](crate::DanmakuMessage).
//! - **Errors** separate a broken stream ([`ProtocolError`], fatal) from
//!   one bad message ([`MalformedMessageError`], skipped).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → decode (Frame) → DecodedMessage → classify (TypedEvent)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod codec;
mod command;
mod error;
mod message;
mod models;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{
    DEFAULT_SEQUENCE, MAX_DECOMPRESSED_SIZE, decode, encode, encode_batch, encode_json,
    encode_with_version,
};
pub use command::{CommandKind, TypedEvent, classify, command_name, normalize_cmd};
pub use error::{MalformedMessageError, ProtocolError};
pub use message::DecodedMessage;
pub use models::{
    DanmakuMessage, FansMedal, GiftMessage, GuardBuyMessage, InteractKind,
    InteractWordMessage, Medal, SuperChatGift, SuperChatMessage, SuperChatUser,
    ToastGiftInfo, ToastGuardInfo, ToastPayInfo, ToastSender, ToastSenderBase,
    UserToastV2Message,
};
pub use types::{
    Frame, FrameHeader, HEADER_LENGTH, Operation, ProtocolVersion, RoomId,
};
