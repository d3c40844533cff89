//! # livedm
//!
//! Client for live-room danmaku streams. Connect to one or many rooms,
//! authenticate, keep the connection alive, and receive chat messages,
//! gifts, super chats and other room events as typed values.
//!
//! This is the facade crate: it re-exports every layer so applications
//! depend on `livedm` alone.
//!
//! | Layer     | Crate              | Role                                  |
//! |-----------|--------------------|---------------------------------------|
//! | Transport | `livedm-transport` | open, send, receive, close            |
//! | Protocol  | `livedm-protocol`  | framing, batches, typed events        |
//! | Heartbeat | `livedm-heartbeat` | keep-alive timer                      |
//! | Session   | `livedm-session`   | one room, start to close              |
//! | Pool      | `livedm-pool`      | many rooms at once                    |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use livedm::prelude::*;
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     fn on_danmaku(&self, room: RoomId, msg: &DanmakuMessage) -> HandlerResult {
//!         println!("[{room}] {}: {}", msg.uname, msg.msg);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), LiveError> {
//! let connector = WebSocketConnector::new(WebSocketConfig::default());
//! let context = Arc::new(NetworkContext::anonymous(connector));
//!
//! let session = RoomSession::new(21_452_505, context, Arc::new(Printer));
//! session.start()?;
//! session.join().await?;
//! # Ok(())
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::LiveError;

pub use livedm_heartbeat as heartbeat;
pub use livedm_pool as pool;
pub use livedm_protocol as protocol;
pub use livedm_session as session;
pub use livedm_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::LiveError;

    pub use livedm_heartbeat::BeatPolicy;
    pub use livedm_pool::{ClientPool, PoolError, RoomOutcome};
    pub use livedm_protocol::{
        DanmakuMessage, GiftMessage, GuardBuyMessage, InteractKind, InteractWordMessage,
        Medal, RoomId, SuperChatMessage, TypedEvent, UserToastV2Message,
    };
    pub use livedm_session::{
        ConnectionState, Handler, HandlerResult, Identity, NetworkContext, RoomSession,
        SessionConfig, SessionError, SessionStats,
    };
    pub use livedm_transport::{Connection, Connector, TransportError};
    #[cfg(feature = "memory")]
    pub use livedm_transport::{MemoryConnector, MemoryPeer};
    #[cfg(feature = "websocket")]
    pub use livedm_transport::{WebSocketConfig, WebSocketConnector};

    pub use serde_json::Value;
}
