//! Room sessions for livedm.
//!
//! A [`RoomSession`] is one live room's connection from start to close:
//! it opens a transport through the caller's [`NetworkContext`],
//! authenticates, keeps the connection alive with heartbeats, and feeds
//! every classified event to a [`Handler`] via [`dispatch`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Connecting → Authenticating → Live → Stopping → Closed
//! ```
//!
//! `start()` and `stop()` return immediately; `join()` waits for
//! `Closed` and reports the first fatal error. There is no automatic
//! reconnection: a closed session stays closed.

mod config;
mod context;
mod dispatch;
mod error;
mod handler;
mod session;

pub use config::{ConnectionState, SessionConfig};
pub use context::{Identity, NetworkContext};
pub use dispatch::dispatch;
pub use error::{AUTH_CODE_TOKEN_ERROR, BoxError, HandlerFailure, SessionError};
pub use handler::{Handler, HandlerResult};
pub use session::{RoomSession, SessionStats};
