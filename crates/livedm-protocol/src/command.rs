//! Command classification: turning a [`DecodedMessage`] into a
//! [`TypedEvent`].
//!
//! The set of commands is closed: each known `cmd` maps to one variant
//! with a typed payload, and anything else becomes
//! [`TypedEvent::Unknown`] carrying the raw JSON so nothing is silently
//! dropped.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    DanmakuMessage, DecodedMessage, GiftMessage, GuardBuyMessage, InteractWordMessage,
    MalformedMessageError, SuperChatMessage, UserToastV2Message,
};

/// A classified event, ready for a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    Popularity(u32),
    Danmaku(DanmakuMessage),
    Gift(GiftMessage),
    SuperChat(SuperChatMessage),
    GuardBuy(GuardBuyMessage),
    UserToastV2(UserToastV2Message),
    InteractWord(InteractWordMessage),
    /// A command without a `cmd`, or one this crate doesn't model.
    Unknown(Value),
}

/// The known command names, after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Danmaku,
    Gift,
    SuperChat,
    GuardBuy,
    UserToastV2,
    InteractWord,
}

impl CommandKind {
    /// Looks up a normalized command name.
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        Some(match cmd {
            "DANMU_MSG" => Self::Danmaku,
            "SEND_GIFT" => Self::Gift,
            "SUPER_CHAT_MESSAGE" => Self::SuperChat,
            "GUARD_BUY" => Self::GuardBuy,
            "USER_TOAST_MSG_V2" => Self::UserToastV2,
            "INTERACT_WORD" => Self::InteractWord,
            _ => return None,
        })
    }

    /// The wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Danmaku => "DANMU_MSG",
            Self::Gift => "SEND_GIFT",
            Self::SuperChat => "SUPER_CHAT_MESSAGE",
            Self::GuardBuy => "GUARD_BUY",
            Self::UserToastV2 => "USER_TOAST_MSG_V2",
            Self::InteractWord => "INTERACT_WORD",
        }
    }
}

impl TypedEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Popularity(_) => "popularity",
            Self::Danmaku(_) => "danmaku",
            Self::Gift(_) => "gift",
            Self::SuperChat(_) => "super_chat",
            Self::GuardBuy(_) => "guard_buy",
            Self::UserToastV2(_) => "user_toast_v2",
            Self::InteractWord(_) => "interact_word",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Strips the protocol flags the server appends to some command names:
/// `DANMU_MSG:4:0:2:2:2:0` becomes `DANMU_MSG`.
pub fn normalize_cmd(cmd: &str) -> &str {
    cmd.split_once(':').map_or(cmd, |(head, _)| head)
}

/// The normalized `cmd` of a command object, if it has one.
pub fn command_name(value: &Value) -> Option<&str> {
    value.get("cmd").and_then(Value::as_str).map(normalize_cmd)
}

/// Classifies one decoded message.
///
/// # Errors
/// [`MalformedMessageError`] when the `cmd` is known but the payload
/// doesn't fit its schema. Unknown commands are never an error.
pub fn classify(message: DecodedMessage) -> Result<TypedEvent, MalformedMessageError> {
    let value = match message {
        DecodedMessage::Popularity(count) => return Ok(TypedEvent::Popularity(count)),
        DecodedMessage::Command(value) => value,
    };
    let Some(kind) = command_name(&value).and_then(CommandKind::from_cmd) else {
        return Ok(TypedEvent::Unknown(value));
    };

    Ok(match kind {
        CommandKind::Danmaku => {
            let info = value.get("info").ok_or_else(|| MalformedMessageError::Field {
                cmd: kind.as_str(),
                reason: "missing `info`".into(),
            })?;
            TypedEvent::Danmaku(DanmakuMessage::from_info(info)?)
        }
        CommandKind::Gift => TypedEvent::Gift(data(kind, value)?),
        CommandKind::SuperChat => TypedEvent::SuperChat(data(kind, value)?),
        CommandKind::GuardBuy => TypedEvent::GuardBuy(data(kind, value)?),
        CommandKind::UserToastV2 => TypedEvent::UserToastV2(data(kind, value)?),
        CommandKind::InteractWord => TypedEvent::InteractWord(data(kind, value)?),
    })
}

/// Deserializes the command's `data` object into `T`.
fn data<T: DeserializeOwned>(kind: CommandKind, mut value: Value) -> Result<T, MalformedMessageError> {
    let data = match value.get_mut("data") {
        Some(data) if data.is_object() => data.take(),
        _ => {
            return Err(MalformedMessageError::Field {
                cmd: kind.as_str(),
                reason: "missing `data` object".into(),
            });
        }
    };
    serde_json::from_value(data).map_err(|e| MalformedMessageError::Field {
        cmd: kind.as_str(),
        reason: e.to_string(),
    })
}
