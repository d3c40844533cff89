//! Typed payloads for the commands this crate understands.
//!
//! Most commands carry a `data` object and deserialize straight through
//! serde: fields the event can't do without are required, everything else
//! falls back to its default so the server adding or dropping optional
//! fields doesn't break the stream. `DANMU_MSG` is the exception: it uses
//! a positional `info` array and is extracted by hand in
//! [`DanmakuMessage::from_info`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::MalformedMessageError;

const DANMAKU: &str = "DANMU_MSG";

// ---------------------------------------------------------------------------
// DANMU_MSG
// ---------------------------------------------------------------------------

/// A chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DanmakuMessage {
    /// Display mode (scrolling, top, bottom).
    pub mode: i64,
    pub font_size: i64,
    /// RGB packed into an integer.
    pub color: u64,
    /// Send time in milliseconds since the epoch.
    pub timestamp: i64,
    pub rnd: i64,
    /// CRC32 of the sender's uid, hex. Present even when `uid` is masked.
    pub uid_crc32: String,
    /// 0 for text, 1 for emoticon.
    pub msg_type: i64,
    pub bubble: i64,

    /// The message text.
    pub msg: String,

    pub uid: u64,
    pub uname: String,
    pub admin: bool,
    pub vip: bool,
    pub svip: bool,
    pub urank: i64,
    pub mobile_verify: bool,
    pub uname_color: String,

    /// The fan medal the sender is wearing, if any.
    pub medal: Option<Medal>,
    pub user_level: i64,
    pub title: Option<String>,
    /// Guard level: 0 none, 1 governor, 2 admiral, 3 captain.
    pub privilege_type: i64,
}

/// A fan medal worn in chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medal {
    pub level: i64,
    pub name: String,
    /// Name of the streamer the medal belongs to.
    pub streamer_name: String,
    pub room_id: u64,
    pub guard_level: i64,
    pub is_lighted: bool,
}

impl DanmakuMessage {
    /// Extracts a chat message from the positional `info` array.
    ///
    /// Text, uid, uname and timestamp are required. Every other slot
    /// defaults when absent or mistyped.
    pub fn from_info(info: &Value) -> Result<Self, MalformedMessageError> {
        if !info.is_array() {
            return Err(field("`info` is not an array"));
        }
        let meta = info.get(0);
        let user = info.get(2);

        let msg = info
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| field("info[1] (text) missing or not a string"))?
            .to_owned();
        let timestamp = meta
            .and_then(|m| m.get(4))
            .and_then(Value::as_i64)
            .ok_or_else(|| field("info[0][4] (timestamp) missing or not an integer"))?;
        let uid = user
            .and_then(|u| u.get(0))
            .and_then(Value::as_u64)
            .ok_or_else(|| field("info[2][0] (uid) missing or not an integer"))?;
        let uname = user
            .and_then(|u| u.get(1))
            .and_then(Value::as_str)
            .ok_or_else(|| field("info[2][1] (uname) missing or not a string"))?
            .to_owned();

        let meta_i64 = |i| int_at(meta, i);
        let user_i64 = |i| int_at(user, i);

        Ok(Self {
            mode: meta_i64(1),
            font_size: meta_i64(2),
            color: meta_i64(3).max(0) as u64,
            timestamp,
            rnd: meta_i64(5),
            uid_crc32: str_at(meta, 7),
            msg_type: meta_i64(9),
            bubble: meta_i64(10),
            msg,
            uid,
            uname,
            admin: user_i64(2) != 0,
            vip: user_i64(3) != 0,
            svip: user_i64(4) != 0,
            urank: user_i64(5),
            mobile_verify: user_i64(6) != 0,
            uname_color: str_at(user, 7),
            medal: info.get(3).and_then(Medal::from_slot),
            user_level: int_at(info.get(4), 0),
            title: info.get(5).and_then(title_from_slot),
            privilege_type: info.get(7).and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

impl Medal {
    /// An empty array means no medal is worn.
    fn from_slot(slot: &Value) -> Option<Self> {
        let arr = slot.as_array()?;
        if arr.is_empty() {
            return None;
        }
        Some(Self {
            level: int_at(Some(slot), 0),
            name: str_at(Some(slot), 1),
            streamer_name: str_at(Some(slot), 2),
            room_id: int_at(Some(slot), 3).max(0) as u64,
            guard_level: int_at(Some(slot), 10),
            is_lighted: int_at(Some(slot), 11) != 0,
        })
    }
}

/// `info[5]` is `[old_title, title]`; either may be empty.
fn title_from_slot(slot: &Value) -> Option<String> {
    let title = slot
        .get(1)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| slot.get(0).and_then(Value::as_str))?;
    (!title.is_empty()).then(|| title.to_owned())
}

fn int_at(slot: Option<&Value>, index: usize) -> i64 {
    slot.and_then(|s| s.get(index))
        .and_then(|v| v.as_i64().or_else(|| v.as_bool().map(i64::from)))
        .unwrap_or(0)
}

fn str_at(slot: Option<&Value>, index: usize) -> String {
    slot.and_then(|s| s.get(index))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn field(reason: &str) -> MalformedMessageError {
    MalformedMessageError::Field {
        cmd: DANMAKU,
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// SEND_GIFT
// ---------------------------------------------------------------------------

/// A gift sent to the streamer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftMessage {
    #[serde(rename = "giftName")]
    pub gift_name: String,
    pub num: u64,
    pub uname: String,
    #[serde(deserialize_with = "flexible::u64")]
    pub uid: u64,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub guard_level: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, rename = "giftId")]
    pub gift_id: u64,
    #[serde(default, rename = "giftType")]
    pub gift_type: i64,
    /// Usually "投喂".
    #[serde(default)]
    pub action: String,
    /// Unit price in the gift's coin type.
    #[serde(default)]
    pub price: u64,
    /// `"gold"` for paid gifts, `"silver"` for free ones.
    #[serde(default)]
    pub coin_type: String,
    #[serde(default)]
    pub total_coin: u64,
    #[serde(default)]
    pub tid: String,
}

impl GiftMessage {
    /// Whether the gift was bought with real currency.
    pub fn is_paid(&self) -> bool {
        self.coin_type == "gold"
    }
}

// ---------------------------------------------------------------------------
// SUPER_CHAT_MESSAGE
// ---------------------------------------------------------------------------

/// A paid highlighted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperChatMessage {
    /// Price in yuan.
    pub price: u64,
    pub message: String,
    #[serde(deserialize_with = "flexible::u64")]
    pub uid: u64,
    pub user_info: SuperChatUser,
    #[serde(default)]
    pub message_trans: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    /// Seconds the message stays pinned.
    #[serde(default)]
    pub time: i64,
    #[serde(default, deserialize_with = "flexible::u64")]
    pub id: u64,
    #[serde(default)]
    pub gift: SuperChatGift,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperChatUser {
    pub uname: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub guard_level: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperChatGift {
    #[serde(default)]
    pub gift_id: u64,
    #[serde(default)]
    pub gift_name: String,
}

impl SuperChatMessage {
    pub fn uname(&self) -> &str {
        &self.user_info.uname
    }
}

// ---------------------------------------------------------------------------
// GUARD_BUY
// ---------------------------------------------------------------------------

/// A membership ("guard") purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardBuyMessage {
    #[serde(deserialize_with = "flexible::u64")]
    pub uid: u64,
    pub username: String,
    /// 1 governor, 2 admiral, 3 captain.
    pub guard_level: i64,
    #[serde(default = "one")]
    pub num: u64,
    /// Price in gold coins.
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub gift_id: u64,
    #[serde(default)]
    pub gift_name: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
}

fn one() -> u64 {
    1
}

// ---------------------------------------------------------------------------
// USER_TOAST_MSG_V2
// ---------------------------------------------------------------------------

/// The newer membership-purchase notice, with richer nested data.
///
/// The nested structs mirror the wire layout; the accessors flatten the
/// fields handlers usually want.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserToastV2Message {
    pub sender_uinfo: ToastSender,
    pub guard_info: ToastGuardInfo,
    #[serde(default)]
    pub pay_info: ToastPayInfo,
    #[serde(default)]
    pub gift_info: ToastGiftInfo,
    #[serde(default)]
    pub toast_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastSender {
    #[serde(deserialize_with = "flexible::u64")]
    pub uid: u64,
    pub base: ToastSenderBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastSenderBase {
    pub name: String,
    #[serde(default)]
    pub face: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToastGuardInfo {
    pub guard_level: i64,
    #[serde(default)]
    pub role_name: String,
    #[serde(default)]
    pub room_guard_count: u64,
    #[serde(default)]
    pub op_type: i64,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToastPayInfo {
    #[serde(default)]
    pub num: u64,
    #[serde(default)]
    pub price: u64,
    /// e.g. "月".
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToastGiftInfo {
    #[serde(default)]
    pub gift_id: u64,
}

impl UserToastV2Message {
    pub fn uid(&self) -> u64 {
        self.sender_uinfo.uid
    }

    pub fn username(&self) -> &str {
        &self.sender_uinfo.base.name
    }

    pub fn guard_level(&self) -> i64 {
        self.guard_info.guard_level
    }

    pub fn num(&self) -> u64 {
        self.pay_info.num
    }

    pub fn price(&self) -> u64 {
        self.pay_info.price
    }

    pub fn unit(&self) -> &str {
        &self.pay_info.unit
    }

    pub fn gift_id(&self) -> u64 {
        self.gift_info.gift_id
    }
}

// ---------------------------------------------------------------------------
// INTERACT_WORD
// ---------------------------------------------------------------------------

/// A viewer entering, following or sharing the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractWordMessage {
    #[serde(deserialize_with = "flexible::u64")]
    pub uid: u64,
    pub uname: String,
    /// See [`InteractKind`].
    pub msg_type: i64,
    #[serde(default)]
    pub roomid: u64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub fans_medal: Option<FansMedal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FansMedal {
    #[serde(default)]
    pub medal_level: i64,
    #[serde(default)]
    pub medal_name: String,
    #[serde(default)]
    pub anchor_roomid: u64,
    #[serde(default)]
    pub guard_level: i64,
    #[serde(default)]
    pub is_lighted: i64,
}

/// What an [`InteractWordMessage`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractKind {
    Enter,
    Follow,
    Share,
    SpecialFollow,
    MutualFollow,
    Other(i64),
}

impl InteractWordMessage {
    pub fn username(&self) -> &str {
        &self.uname
    }

    pub fn kind(&self) -> InteractKind {
        match self.msg_type {
            1 => InteractKind::Enter,
            2 => InteractKind::Follow,
            3 => InteractKind::Share,
            4 => InteractKind::SpecialFollow,
            5 => InteractKind::MutualFollow,
            other => InteractKind::Other(other),
        }
    }

    /// A medal with level 0 is the server's way of saying "none".
    pub fn medal(&self) -> Option<&FansMedal> {
        self.fans_medal.as_ref().filter(|m| m.medal_level > 0)
    }
}

/// Ids arrive as numbers from some commands and as strings from others.
mod flexible {
    use serde::{Deserialize, Deserializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    pub(super) fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match NumOrStr::deserialize(d)? {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Str(s) => s.trim().parse().map_err(de::Error::custom),
        }
    }
}
