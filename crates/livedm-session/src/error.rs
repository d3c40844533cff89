//! Error types for the session layer.

use std::time::Duration;

use livedm_protocol::ProtocolError;
use livedm_transport::TransportError;

/// Boxed error a [`Handler`](crate::Handler) may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Auth reply code meaning the `key` token was rejected.
pub const AUTH_CODE_TOKEN_ERROR: i64 = -101;

/// Errors that end a session.
///
/// Everything except `AlreadyStarted` is *fatal*: it is recorded on the
/// session, moves it to `Closed`, and comes back from
/// [`RoomSession::join`](crate::RoomSession::join).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection couldn't be opened, or broke.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server sent bytes that don't frame correctly.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered the auth frame with a non-zero code.
    #[error("auth rejected with code {code}")]
    Auth { code: i64 },

    /// The auth reply body couldn't be read.
    #[error("unreadable auth reply: {0}")]
    BadAuthReply(String),

    /// No auth reply arrived in time.
    #[error("no auth reply within {0:?}")]
    AuthTimeout(Duration),

    /// `start()` was called on a session that was already started or
    /// stopped.
    #[error("session already started")]
    AlreadyStarted,

    /// One of the session's tasks panicked.
    #[error("session task panicked: {0}")]
    Panicked(String),
}

impl SessionError {
    /// Whether the server rejected the auth token specifically.
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::Auth { code } if *code == AUTH_CODE_TOKEN_ERROR)
    }
}

/// A handler call that didn't succeed. Logged and counted by the session;
/// never fatal.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error("handler returned an error: {0}")]
    Returned(#[source] BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}
