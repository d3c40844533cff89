//! Unified error type for livedm.

use std::sync::Arc;

use livedm_pool::PoolError;
use livedm_protocol::{MalformedMessageError, ProtocolError};
use livedm_session::SessionError;
use livedm_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// Application code built on the `livedm` crate can use this one type
/// with `?` instead of importing the error of each layer.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Connecting, sending or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The byte stream could not be framed or decompressed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A single message could not be interpreted.
    #[error(transparent)]
    Malformed(#[from] MalformedMessageError),

    /// A session could not be started.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A session ended with a fatal error, as reported by `join`.
    #[error(transparent)]
    Closed(#[from] Arc<SessionError>),

    /// Pool bookkeeping failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl LiveError {
    /// Returns `true` if the server rejected the credentials.
    pub fn is_token_error(&self) -> bool {
        match self {
            Self::Session(e) => e.is_token_error(),
            Self::Closed(e) => e.is_token_error(),
            _ => false,
        }
    }
}
