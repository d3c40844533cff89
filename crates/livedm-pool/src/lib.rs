//! Multi-room orchestration for livedm.
//!
//! A [`ClientPool`] owns one [`RoomSession`] per room and runs the
//! lifecycle operations across all of them at once. Sessions stay
//! independent: one room failing never stops the others, and every
//! aggregate operation reports per-room outcomes instead of stopping at
//! the first error.

use std::sync::Arc;

use futures_util::future::join_all;
use livedm_protocol::RoomId;
use livedm_session::{
    ConnectionState, Handler, NetworkContext, RoomSession, SessionConfig, SessionError,
};
use livedm_transport::Connector;
use tracing::{info, warn};

/// Per-room result of waiting for a session to close.
pub type RoomOutcome = (RoomId, Result<(), Arc<SessionError>>);

/// Errors from pool bookkeeping. Session failures are reported through
/// [`RoomOutcome`]s, not here.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The room already has a session in this pool.
    #[error("room {0} is already in the pool")]
    DuplicateRoom(RoomId),

    /// The room has no session in this pool.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
}

/// A set of room sessions sharing one [`NetworkContext`].
///
/// Rooms are kept in insertion order, and every aggregate result lists
/// rooms in that order.
pub struct ClientPool<C: Connector> {
    context: Arc<NetworkContext<C>>,
    config: SessionConfig,
    sessions: Vec<RoomSession<C>>,
}

impl<C: Connector> ClientPool<C> {
    /// Creates an empty pool whose sessions use the default config.
    pub fn new(context: Arc<NetworkContext<C>>) -> Self {
        Self::with_config(context, SessionConfig::default())
    }

    /// Creates an empty pool whose sessions all use `config`.
    pub fn with_config(context: Arc<NetworkContext<C>>, config: SessionConfig) -> Self {
        Self {
            context,
            config,
            sessions: Vec::new(),
        }
    }

    /// Adds an idle session for `room_id`. Call [`start_all`](Self::start_all)
    /// (or start the session directly) to connect it.
    pub fn add_room(
        &mut self,
        room_id: impl Into<RoomId>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), PoolError> {
        let room_id = room_id.into();
        if self.position(room_id).is_some() {
            return Err(PoolError::DuplicateRoom(room_id));
        }
        self.sessions.push(RoomSession::with_config(
            room_id,
            Arc::clone(&self.context),
            handler,
            self.config.clone(),
        ));
        info!(%room_id, rooms = self.sessions.len(), "room added");
        Ok(())
    }

    /// Stops and releases one room's session, then forgets it.
    pub async fn remove_room(&mut self, room_id: impl Into<RoomId>) -> Result<(), PoolError> {
        let room_id = room_id.into();
        let index = self
            .position(room_id)
            .ok_or(PoolError::RoomNotFound(room_id))?;
        let session = self.sessions.remove(index);
        session.stop_and_close().await;
        info!(%room_id, rooms = self.sessions.len(), "room removed");
        Ok(())
    }

    /// Starts every session. Failures are collected, never
    /// short-circuiting: every other session is still started.
    pub fn start_all(&self) -> Vec<(RoomId, SessionError)> {
        let failures: Vec<_> = self
            .sessions
            .iter()
            .filter_map(|s| s.start().err().map(|e| (s.room_id(), e)))
            .collect();
        for (room_id, error) in &failures {
            warn!(%room_id, %error, "room failed to start");
        }
        failures
    }

    /// Waits for every session to close, concurrently.
    pub async fn join_all(&self) -> Vec<RoomOutcome> {
        let outcomes = join_all(self.sessions.iter().map(|s| s.join())).await;
        self.sessions
            .iter()
            .map(RoomSession::room_id)
            .zip(outcomes)
            .collect()
    }

    /// Stops every session, waits for all of them, releases them and
    /// empties the pool. Returns how each room ended.
    pub async fn stop_all(&mut self) -> Vec<RoomOutcome> {
        for session in &self.sessions {
            session.stop();
        }
        let outcomes = self.join_all().await;
        join_all(self.sessions.iter().map(|s| s.stop_and_close())).await;
        self.sessions.clear();

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!(rooms = outcomes.len(), failed, "pool stopped");
        outcomes
    }

    /// Current state of every room.
    pub fn states(&self) -> Vec<(RoomId, ConnectionState)> {
        self.sessions
            .iter()
            .map(|s| (s.room_id(), s.state()))
            .collect()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.sessions.iter().map(RoomSession::room_id).collect()
    }

    pub fn session(&self, room_id: impl Into<RoomId>) -> Option<&RoomSession<C>> {
        let room_id = room_id.into();
        self.sessions.iter().find(|s| s.room_id() == room_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn context(&self) -> &Arc<NetworkContext<C>> {
        &self.context
    }

    fn position(&self, room_id: RoomId) -> Option<usize> {
        self.sessions.iter().position(|s| s.room_id() == room_id)
    }
}
