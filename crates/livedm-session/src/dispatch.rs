//! Routes one classified event to the matching handler method.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use livedm_protocol::{RoomId, TypedEvent};
use tracing::warn;

use crate::{Handler, HandlerFailure};

/// Calls exactly one handler method for `event`.
///
/// An `Err` from the handler and a panic inside it are both caught here and
/// logged, so neither can reach the receive loop.
pub fn dispatch(
    room: RoomId,
    event: &TypedEvent,
    handler: &dyn Handler,
) -> Result<(), HandlerFailure> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
        TypedEvent::Popularity(count) => handler.on_popularity(room, *count),
        TypedEvent::Danmaku(msg) => handler.on_danmaku(room, msg),
        TypedEvent::Gift(msg) => handler.on_gift(room, msg),
        TypedEvent::SuperChat(msg) => handler.on_super_chat(room, msg),
        TypedEvent::GuardBuy(msg) => handler.on_guard_buy(room, msg),
        TypedEvent::UserToastV2(msg) => handler.on_user_toast_v2(room, msg),
        TypedEvent::InteractWord(msg) => handler.on_interact_word(room, msg),
        TypedEvent::Unknown(raw) => {
            handler.on_unknown(room, raw);
            Ok(())
        }
    }));

    let failure = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => HandlerFailure::Returned(e),
        Err(payload) => HandlerFailure::Panicked(panic_message(payload.as_ref())),
    };
    warn!(
        room_id = %room,
        event = event.kind(),
        error = %failure,
        "handler failed"
    );
    Err(failure)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
