//! One room's connection: lifecycle, handshake, receive loop and heartbeats.
//!
//! A started session runs three Tokio tasks:
//!
//! - the **supervisor** connects, sends the auth frame, waits for the
//!   reply, and owns shutdown;
//! - the **receive** task is the only reader: it decodes every read into
//!   frames and routes each one, in order, to the handler;
//! - the **heartbeat** task (only while `Live`) writes a heartbeat frame
//!   every period.
//!
//! Writes go through one writer lock. Everything observable about the
//! session flows through a single `watch` channel of [`ConnectionState`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};

use livedm_heartbeat::HeartbeatTimer;
use livedm_protocol::{self as protocol, DecodedMessage, Frame, Operation, RoomId, TypedEvent};
use livedm_transport::{Connection, Connector, TransportError};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::context::{AuthReply, AuthRequest};
use crate::dispatch::{dispatch, panic_message};
use crate::{ConnectionState, Handler, NetworkContext, SessionConfig, SessionError};

/// Body of every heartbeat frame.
const HEARTBEAT_BODY: &[u8] = b"{}";

type ConnectionOf<C> = <C as Connector>::Connection;
type TaskResult = Result<Result<(), SessionError>, JoinError>;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// A snapshot of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Logical frames after batch expansion.
    pub frames_received: u64,
    /// Events handed to the handler, whether or not it succeeded.
    pub events_dispatched: u64,
    /// Messages dropped because they didn't match their schema.
    pub malformed_messages: u64,
    /// Handler calls that returned an error or panicked.
    pub handler_failures: u64,
    pub heartbeats_sent: u64,
    /// Heartbeats that fired noticeably after their deadline.
    pub late_heartbeats: u64,
    /// Heartbeat periods skipped because the task was stalled.
    pub missed_heartbeats: u64,
    /// The most recent popularity counter, if one arrived.
    pub last_popularity: Option<u32>,
}

const NO_POPULARITY: u64 = u64::MAX;

struct Counters {
    frames_received: AtomicU64,
    events_dispatched: AtomicU64,
    malformed_messages: AtomicU64,
    handler_failures: AtomicU64,
    heartbeats_sent: AtomicU64,
    late_heartbeats: AtomicU64,
    missed_heartbeats: AtomicU64,
    last_popularity: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            malformed_messages: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            late_heartbeats: AtomicU64::new(0),
            missed_heartbeats: AtomicU64::new(0),
            last_popularity: AtomicU64::new(NO_POPULARITY),
        }
    }

    fn snapshot(&self) -> SessionStats {
        let last = self.last_popularity.load(Ordering::Relaxed);
        SessionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            late_heartbeats: self.late_heartbeats.load(Ordering::Relaxed),
            missed_heartbeats: self.missed_heartbeats.load(Ordering::Relaxed),
            last_popularity: u32::try_from(last).ok(),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the session's tasks share.
struct Shared<C: Connector> {
    room_id: RoomId,
    config: SessionConfig,
    context: Arc<NetworkContext<C>>,
    handler: Arc<dyn Handler>,
    state: watch::Sender<ConnectionState>,
    /// First fatal error. Later ones are logged and dropped.
    error: OnceLock<Arc<SessionError>>,
    /// Serializes every write to the connection.
    writer: Mutex<()>,
    counters: Counters,
}

impl<C: Connector> Shared<C> {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves the state forward to `to`. Returns `false` (and changes
    /// nothing) if `to` isn't ahead of the current state.
    fn transition(&self, to: ConnectionState) -> bool {
        let mut from = to;
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                from = *current;
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(room_id = %self.room_id, %from, %to, "state changed");
        }
        changed
    }

    fn record(&self, err: SessionError) {
        error!(room_id = %self.room_id, error = %err, "session failed");
        let _ = self.error.set(Arc::new(err));
    }

    /// Records a fatal error and starts shutting down.
    fn fail(&self, err: SessionError) {
        self.record(err);
        self.transition(ConnectionState::Stopping);
    }

    fn outcome(&self) -> Result<(), Arc<SessionError>> {
        match self.error.get() {
            Some(err) => Err(Arc::clone(err)),
            None => Ok(()),
        }
    }

    // -- routing ------------------------------------------------------------

    /// Handles one logical frame. Only auth problems are returned; every
    /// per-message fault is logged, counted and skipped.
    fn route(&self, frame: &Frame, seen_unknown: &mut HashSet<String>) -> Result<(), SessionError> {
        bump(&self.counters.frames_received);

        match frame.operation() {
            Operation::AuthReply => return self.on_auth_reply(frame.body()),
            Operation::Unknown(code) => {
                debug!(
                    room_id = %self.room_id,
                    operation = code,
                    len = frame.body().len(),
                    "skipping frame with unknown operation"
                );
                return Ok(());
            }
            _ => {}
        }

        let message = match DecodedMessage::from_frame(frame) {
            None => return Ok(()),
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                self.malformed(&e);
                return Ok(());
            }
        };
        let event = match protocol::classify(message) {
            Ok(event) => event,
            Err(e) => {
                self.malformed(&e);
                return Ok(());
            }
        };

        match &event {
            TypedEvent::Popularity(count) => {
                self.counters
                    .last_popularity
                    .store(u64::from(*count), Ordering::Relaxed);
            }
            TypedEvent::Unknown(raw) => {
                let cmd = protocol::command_name(raw).unwrap_or("<none>");
                if seen_unknown.insert(cmd.to_owned()) {
                    debug!(room_id = %self.room_id, cmd, "unhandled command");
                }
            }
            _ => {}
        }

        bump(&self.counters.events_dispatched);
        if dispatch(self.room_id, &event, self.handler.as_ref()).is_err() {
            bump(&self.counters.handler_failures);
        }
        Ok(())
    }

    fn on_auth_reply(&self, body: &[u8]) -> Result<(), SessionError> {
        let reply: AuthReply = serde_json::from_slice(body)
            .map_err(|e| SessionError::BadAuthReply(e.to_string()))?;
        if reply.code != 0 {
            return Err(SessionError::Auth { code: reply.code });
        }
        if self.transition(ConnectionState::Live) {
            info!(room_id = %self.room_id, "authenticated");
        }
        Ok(())
    }

    fn malformed(&self, err: &protocol::MalformedMessageError) {
        bump(&self.counters.malformed_messages);
        warn!(room_id = %self.room_id, error = %err, "dropping malformed message");
    }
}

async fn wait_state(
    rx: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) {
    // The sender lives in `Shared`, which outlives every receiver's task.
    let _ = rx.wait_for(predicate).await;
}

// ---------------------------------------------------------------------------
// RoomSession
// ---------------------------------------------------------------------------

/// A client for one live room.
///
/// A session is single-use: it connects once, and once `Closed` it stays
/// closed. Reconnecting means creating a new session.
///
/// ```ignore
/// let session = RoomSession::new(room_id, context, handler);
/// session.start()?;
/// // ... later
/// session.stop();
/// session.join().await?;
/// ```
pub struct RoomSession<C: Connector> {
    shared: Arc<Shared<C>>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> RoomSession<C> {
    /// Creates an idle session with the default [`SessionConfig`].
    pub fn new(
        room_id: impl Into<RoomId>,
        context: Arc<NetworkContext<C>>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self::with_config(room_id, context, handler, SessionConfig::default())
    }

    pub fn with_config(
        room_id: impl Into<RoomId>,
        context: Arc<NetworkContext<C>>,
        handler: Arc<dyn Handler>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                room_id: room_id.into(),
                config: config.validated(),
                context,
                handler,
                state,
                error: OnceLock::new(),
                writer: Mutex::new(()),
                counters: Counters::new(),
            }),
            supervisor: StdMutex::new(None),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.shared.room_id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// A receiver that sees every state change from now on.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Starts connecting in the background and returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// [`SessionError::AlreadyStarted`] if the session is not `Idle`.
    pub fn start(&self) -> Result<(), SessionError> {
        if !self.shared.transition(ConnectionState::Connecting) {
            return Err(SessionError::AlreadyStarted);
        }
        info!(room_id = %self.shared.room_id, "session starting");

        let handle = tokio::spawn(supervise(Arc::clone(&self.shared)));
        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Asks the session to shut down and returns immediately.
    ///
    /// A session that was never started goes straight to `Closed`.
    /// Calling it again, or after the session closed on its own, does
    /// nothing.
    pub fn stop(&self) {
        let changed = self.shared.state.send_if_modified(|state| match *state {
            ConnectionState::Idle => {
                *state = ConnectionState::Closed;
                true
            }
            ConnectionState::Stopping | ConnectionState::Closed => false,
            _ => {
                *state = ConnectionState::Stopping;
                true
            }
        });
        if changed {
            info!(room_id = %self.shared.room_id, "stop requested");
        }
    }

    /// Waits until the session is `Closed` and returns its first fatal
    /// error, if any. Can be called any number of times.
    ///
    /// Returns at once for a session that was never started.
    pub async fn join(&self) -> Result<(), Arc<SessionError>> {
        let mut rx = self.shared.state.subscribe();
        if *rx.borrow() == ConnectionState::Idle {
            warn!(room_id = %self.shared.room_id, "join on a session that was never started");
            return Ok(());
        }
        wait_state(&mut rx, |s| *s == ConnectionState::Closed).await;
        self.shared.outcome()
    }

    /// Stops the session, waits for it and releases its tasks.
    ///
    /// Never fails: a fatal error is logged instead of returned. Safe to
    /// call more than once.
    pub async fn stop_and_close(&self) {
        self.stop();
        if let Err(e) = self.join().await {
            warn!(room_id = %self.shared.room_id, error = %e, "session ended with error");
        }
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(room_id = %self.shared.room_id, error = %e, "supervisor task failed");
            }
        }
    }
}

impl<C: Connector> Drop for RoomSession<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Connector> std::fmt::Debug for RoomSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.shared.room_id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Moves the session to `Closed` when the supervisor exits, even by panic.
struct CloseGuard<C: Connector>(Arc<Shared<C>>);

impl<C: Connector> Drop for CloseGuard<C> {
    fn drop(&mut self) {
        let shared = &self.0;
        if std::thread::panicking() {
            shared.record(SessionError::Panicked("supervisor".into()));
        }
        if shared.transition(ConnectionState::Closed) {
            let stats = shared.counters.snapshot();
            info!(
                room_id = %shared.room_id,
                frames = stats.frames_received,
                events = stats.events_dispatched,
                "session closed"
            );
        }
    }
}

enum AuthOutcome {
    Live,
    Stopped,
    ReceiverEnded(TaskResult),
    TimedOut,
}

enum LiveExit {
    Receiver(TaskResult),
    Heartbeat(TaskResult),
    Stopped,
}

async fn supervise<C: Connector>(shared: Arc<Shared<C>>) {
    let _guard = CloseGuard(Arc::clone(&shared));
    let mut state_rx = shared.state.subscribe();
    let room_id = shared.room_id;

    // --- Step 1: Connect ---
    let connected = tokio::select! {
        biased;
        _ = wait_state(&mut state_rx, |s| s.is_terminating()) => None,
        res = shared.context.connector().connect(room_id.0) => Some(res),
    };
    let conn = match connected {
        None => return,
        Some(Ok(conn)) => Arc::new(conn),
        Some(Err(e)) => {
            shared.fail(e.into());
            return;
        }
    };
    info!(%room_id, conn_id = %conn.id(), "connected");

    // --- Step 2: Auth frame ---
    if let Err(e) = send_auth(&shared, conn.as_ref()).await {
        shared.fail(e);
        shutdown(&shared, conn.as_ref(), Vec::new()).await;
        return;
    }
    shared.transition(ConnectionState::Authenticating);

    let mut receiver = tokio::spawn(receive_loop(Arc::clone(&shared), Arc::clone(&conn)));

    // --- Step 3: Wait for the auth reply ---
    let auth_deadline = Instant::now() + shared.config.auth_timeout;
    let outcome = tokio::select! {
        res = &mut receiver => AuthOutcome::ReceiverEnded(res),
        _ = wait_state(&mut state_rx, |s| *s >= ConnectionState::Live) => {
            if shared.state() == ConnectionState::Live {
                AuthOutcome::Live
            } else {
                AuthOutcome::Stopped
            }
        }
        _ = time::sleep_until(auth_deadline) => AuthOutcome::TimedOut,
    };

    match outcome {
        AuthOutcome::Live => {}
        AuthOutcome::Stopped => {
            shutdown(&shared, conn.as_ref(), vec![("receive", receiver)]).await;
            return;
        }
        AuthOutcome::ReceiverEnded(res) => {
            task_finished(&shared, "receive", res);
            shutdown(&shared, conn.as_ref(), Vec::new()).await;
            return;
        }
        AuthOutcome::TimedOut => {
            // Straight to Closed: there is nothing to drain.
            shared.record(SessionError::AuthTimeout(shared.config.auth_timeout));
            receiver.abort();
            let _ = receiver.await;
            close_connection(&shared, conn.as_ref(), Instant::now() + shared.config.shutdown_grace)
                .await;
            return;
        }
    }

    // --- Step 4: Live ---
    let mut heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&shared), Arc::clone(&conn)));

    let exit = tokio::select! {
        res = &mut receiver => LiveExit::Receiver(res),
        res = &mut heartbeat => LiveExit::Heartbeat(res),
        _ = wait_state(&mut state_rx, |s| s.is_terminating()) => LiveExit::Stopped,
    };
    let tasks = match exit {
        LiveExit::Receiver(res) => {
            task_finished(&shared, "receive", res);
            vec![("heartbeat", heartbeat)]
        }
        LiveExit::Heartbeat(res) => {
            task_finished(&shared, "heartbeat", res);
            vec![("receive", receiver)]
        }
        LiveExit::Stopped => vec![("receive", receiver), ("heartbeat", heartbeat)],
    };

    shutdown(&shared, conn.as_ref(), tasks).await;
}

async fn send_auth<C: Connector>(
    shared: &Shared<C>,
    conn: &ConnectionOf<C>,
) -> Result<(), SessionError> {
    let request = AuthRequest::new(
        shared.context.identity(),
        shared.room_id,
        shared.config.protocol_version,
    );
    let frame = protocol::encode_json(Operation::Auth, &request)?;
    let _writer = shared.writer.lock().await;
    conn.send(&frame).await?;
    debug!(room_id = %shared.room_id, "auth frame sent");
    Ok(())
}

/// Records how a task ended. A clean exit is not an error, but the
/// session can't go on without the task either way.
fn task_finished<C: Connector>(shared: &Shared<C>, task: &'static str, res: TaskResult) {
    match res {
        Ok(Ok(())) => debug!(room_id = %shared.room_id, task, "task finished"),
        Ok(Err(e)) => shared.record(e),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            shared.record(SessionError::Panicked(format!(
                "{task} task: {}",
                panic_message(&*payload)
            )));
        }
        Err(_) => debug!(room_id = %shared.room_id, task, "task cancelled"),
    }
    shared.transition(ConnectionState::Stopping);
}

/// Stopping → close the connection → drain the tasks. Bounded by
/// `shutdown_grace`: tasks still running at the deadline are aborted.
async fn shutdown<C: Connector>(
    shared: &Shared<C>,
    conn: &ConnectionOf<C>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), SessionError>>)>,
) {
    shared.transition(ConnectionState::Stopping);
    let deadline = Instant::now() + shared.config.shutdown_grace;

    close_connection(shared, conn, deadline).await;

    for (task, mut handle) in tasks {
        match time::timeout_at(deadline, &mut handle).await {
            Ok(res) => task_finished(shared, task, res),
            Err(_) => {
                warn!(room_id = %shared.room_id, task, "task outlived shutdown grace, aborting");
                handle.abort();
            }
        }
    }
}

async fn close_connection<C: Connector>(
    shared: &Shared<C>,
    conn: &ConnectionOf<C>,
    deadline: Instant,
) {
    match time::timeout_at(deadline, conn.close()).await {
        Ok(Ok(())) => debug!(room_id = %shared.room_id, "connection closed"),
        Ok(Err(e)) => debug!(room_id = %shared.room_id, error = %e, "close failed"),
        Err(_) => warn!(room_id = %shared.room_id, "close timed out"),
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn receive_loop<C: Connector>(
    shared: Arc<Shared<C>>,
    conn: Arc<ConnectionOf<C>>,
) -> Result<(), SessionError> {
    let mut seen_unknown = HashSet::new();

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                let state = shared.state();
                if state.is_terminating() {
                    return Ok(());
                }
                if state < ConnectionState::Live {
                    return Err(TransportError::ConnectionClosed(
                        "closed before auth reply".into(),
                    )
                    .into());
                }
                info!(room_id = %shared.room_id, "server closed the connection");
                shared.transition(ConnectionState::Stopping);
                return Ok(());
            }
            Err(e) => {
                if shared.state().is_terminating() {
                    return Ok(());
                }
                return Err(e.into());
            }
        };
        if shared.state().is_terminating() {
            return Ok(());
        }

        let frames = protocol::decode(&data)?;
        for frame in &frames {
            shared.route(frame, &mut seen_unknown)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat loop
// ---------------------------------------------------------------------------

async fn heartbeat_loop<C: Connector>(
    shared: Arc<Shared<C>>,
    conn: Arc<ConnectionOf<C>>,
) -> Result<(), SessionError> {
    let frame = protocol::encode(Operation::Heartbeat, HEARTBEAT_BODY)?;
    let mut state_rx = shared.state.subscribe();
    let mut timer = HeartbeatTimer::new(shared.config.heartbeat());

    loop {
        let beat = tokio::select! {
            _ = wait_state(&mut state_rx, |s| *s != ConnectionState::Live) => return Ok(()),
            beat = timer.wait_for_beat() => beat,
        };
        let metrics = timer.metrics();
        shared
            .counters
            .late_heartbeats
            .store(metrics.late_beats, Ordering::Relaxed);
        shared
            .counters
            .missed_heartbeats
            .store(metrics.missed_beats, Ordering::Relaxed);

        // Checked under the writer lock so nothing is written once the
        // session has left Live.
        let _writer = shared.writer.lock().await;
        if shared.state() != ConnectionState::Live {
            return Ok(());
        }
        if let Err(e) = conn.send(&frame).await {
            if shared.state().is_terminating() {
                return Ok(());
            }
            return Err(e.into());
        }
        bump(&shared.counters.heartbeats_sent);
        debug!(room_id = %shared.room_id, beat = beat.beat, "heartbeat sent");
    }
}
