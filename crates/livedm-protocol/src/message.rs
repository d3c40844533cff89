//! The first step above raw frames: what a frame's body means.

use serde_json::Value;

use crate::{Frame, MalformedMessageError, Operation};

/// A frame body interpreted according to its operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// Heartbeat reply: the room's popularity counter.
    Popularity(u32),
    /// A JSON command object, still unclassified.
    Command(Value),
}

impl DecodedMessage {
    /// Interprets one decoded frame.
    ///
    /// Returns `None` for frames that carry no event: control operations
    /// (the session consumes `AuthReply` itself), unknown operations, and
    /// command frames with an empty body.
    pub fn from_frame(frame: &Frame) -> Option<Result<Self, MalformedMessageError>> {
        match frame.operation() {
            Operation::HeartbeatReply => Some(popularity(frame.body())),
            Operation::SendMsgReply if frame.body().is_empty() => None,
            Operation::SendMsgReply => Some(
                serde_json::from_slice(frame.body())
                    .map(Self::Command)
                    .map_err(MalformedMessageError::InvalidJson),
            ),
            _ => None,
        }
    }
}

fn popularity(body: &[u8]) -> Result<DecodedMessage, MalformedMessageError> {
    match body {
        [a, b, c, d, ..] => Ok(DecodedMessage::Popularity(u32::from_be_bytes([
            *a, *b, *c, *d,
        ]))),
        _ => Err(MalformedMessageError::ShortPopularity { len: body.len() }),
    }
}
