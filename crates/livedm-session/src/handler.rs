//! The callback interface for classified events.
//!
//! livedm doesn't decide what to do with a chat message or a gift: that is
//! the application's job. Instead it defines the [`Handler`] trait, one
//! method per event kind, each with a no-op default, so an implementation
//! only overrides what it cares about.

use livedm_protocol::{
    DanmakuMessage, GiftMessage, GuardBuyMessage, InteractWordMessage, RoomId,
    SuperChatMessage, UserToastV2Message,
};
use serde_json::Value;

use crate::BoxError;

/// What a handler method returns. An `Err` is logged and counted by the
/// session; it never stops the stream.
pub type HandlerResult = Result<(), BoxError>;

/// Receives the events of one or more rooms.
///
/// # Trait bounds
///
/// - `Send + Sync` → one handler may be shared by several sessions, and
///   different rooms dispatch concurrently from different tasks.
/// - `'static` → it outlives the sessions it is attached to.
///
/// Methods run on the session's receive task, one event at a time per
/// room. A slow handler delays that room's stream (and nothing else), so
/// hand heavy work off to another task.
///
/// # Example
///
/// ```rust
/// use livedm_protocol::{DanmakuMessage, RoomId};
/// use livedm_session::{Handler, HandlerResult};
///
/// struct PrintChat;
///
/// impl Handler for PrintChat {
///     fn on_danmaku(&self, room: RoomId, msg: &DanmakuMessage) -> HandlerResult {
///         println!("[{room}] {}: {}", msg.uname, msg.msg);
///         Ok(())
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Popularity counter from a heartbeat reply.
    fn on_popularity(&self, _room: RoomId, _count: u32) -> HandlerResult {
        Ok(())
    }

    fn on_danmaku(&self, _room: RoomId, _msg: &DanmakuMessage) -> HandlerResult {
        Ok(())
    }

    fn on_gift(&self, _room: RoomId, _msg: &GiftMessage) -> HandlerResult {
        Ok(())
    }

    fn on_super_chat(&self, _room: RoomId, _msg: &SuperChatMessage) -> HandlerResult {
        Ok(())
    }

    fn on_guard_buy(&self, _room: RoomId, _msg: &GuardBuyMessage) -> HandlerResult {
        Ok(())
    }

    fn on_user_toast_v2(&self, _room: RoomId, _msg: &UserToastV2Message) -> HandlerResult {
        Ok(())
    }

    fn on_interact_word(&self, _room: RoomId, _msg: &InteractWordMessage) -> HandlerResult {
        Ok(())
    }

    /// Any command livedm doesn't model, as raw JSON.
    fn on_unknown(&self, _room: RoomId, _raw: &Value) {}
}
