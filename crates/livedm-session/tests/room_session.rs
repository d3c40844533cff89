//! Integration tests for `RoomSession` over the in-memory transport.
//!
//! The test plays the server through a `MemoryPeer`. Every test runs on a
//! paused Tokio clock, so timeouts and heartbeat periods are exact and
//! instant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use livedm_protocol::{
    self as protocol, DanmakuMessage, GiftMessage, Operation, ProtocolVersion, RoomId,
};
use livedm_session::{
    ConnectionState, Handler, HandlerResult, NetworkContext, RoomSession, SessionConfig,
    SessionError,
};
use livedm_transport::{MemoryConnector, MemoryPeer};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant};

const ROOM: u64 = 21452505;

// =========================================================================
// Helpers
// =========================================================================

/// Records every event as a short string, in delivery order.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Handler for Recorder {
    fn on_popularity(&self, _room: RoomId, count: u32) -> HandlerResult {
        self.push(format!("popularity:{count}"));
        Ok(())
    }

    fn on_danmaku(&self, room: RoomId, msg: &DanmakuMessage) -> HandlerResult {
        assert_eq!(room, RoomId(ROOM));
        self.push(format!("danmaku:{}", msg.msg));
        Ok(())
    }

    fn on_gift(&self, _room: RoomId, msg: &GiftMessage) -> HandlerResult {
        self.push(format!("gift:{}", msg.gift_name));
        Ok(())
    }

    fn on_unknown(&self, _room: RoomId, raw: &Value) {
        self.push(format!("unknown:{}", raw["cmd"].as_str().unwrap_or("?")));
    }
}

/// Fails on gifts, panics on chat, records everything else.
#[derive(Default)]
struct Faulty {
    inner: Recorder,
}

impl Handler for Faulty {
    fn on_danmaku(&self, _room: RoomId, _msg: &DanmakuMessage) -> HandlerResult {
        panic!("chat handler bug");
    }

    fn on_gift(&self, _room: RoomId, _msg: &GiftMessage) -> HandlerResult {
        Err("gift sink unavailable".into())
    }

    fn on_unknown(&self, room: RoomId, raw: &Value) {
        self.inner.on_unknown(room, raw);
    }
}

type Session = RoomSession<MemoryConnector>;

fn session_with(
    handler: Arc<dyn Handler>,
    config: SessionConfig,
) -> (Session, UnboundedReceiver<MemoryPeer>) {
    let (connector, peers) = MemoryConnector::new();
    let context = Arc::new(NetworkContext::anonymous(connector));
    (RoomSession::with_config(ROOM, context, handler, config), peers)
}

fn session(handler: Arc<dyn Handler>) -> (Session, UnboundedReceiver<MemoryPeer>) {
    session_with(handler, SessionConfig::default())
}

fn server_frame(op: Operation, body: &[u8]) -> Vec<u8> {
    protocol::encode_with_version(op, ProtocolVersion::Normal, body).unwrap()
}

fn command(value: Value) -> Vec<u8> {
    server_frame(Operation::SendMsgReply, value.to_string().as_bytes())
}

fn auth_reply(code: i64) -> Vec<u8> {
    server_frame(Operation::AuthReply, json!({ "code": code }).to_string().as_bytes())
}

fn danmaku(text: Value) -> Value {
    json!({
        "cmd": "DANMU_MSG:4:0:2:2:2:0",
        "info": [[0, 1, 25, 16777215, 1700000000000i64, 0, 0, "abcd", 0, 0, 0], text, [7, "viewer"]],
    })
}

/// Takes the next connection and checks it opens with an auth frame.
async fn accept(peers: &mut UnboundedReceiver<MemoryPeer>) -> (MemoryPeer, Value) {
    let mut peer = peers.recv().await.expect("session should connect");
    let bytes = peer.recv().await.expect("session should send auth");
    let frames = protocol::decode(&bytes).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].operation(), Operation::Auth);
    let body = serde_json::from_slice(frames[0].body()).unwrap();
    (peer, body)
}

/// Accepts, approves the auth, and waits until the session is live.
async fn go_live(session: &Session, peers: &mut UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    let (peer, _) = accept(peers).await;
    peer.send(auth_reply(0)).unwrap();
    let mut states = session.subscribe_state();
    states
        .wait_for(|s| *s == ConnectionState::Live)
        .await
        .unwrap();
    peer
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

/// Drains what the client has sent so far and counts heartbeat frames.
fn count_heartbeats(peer: &mut MemoryPeer) -> usize {
    let mut count = 0;
    while let Some(bytes) = peer.try_recv() {
        for frame in protocol::decode(&bytes).unwrap() {
            if frame.operation() == Operation::Heartbeat {
                assert_eq!(frame.version(), ProtocolVersion::Heartbeat);
                assert_eq!(frame.body(), b"{}");
                count += 1;
            }
        }
    }
    count
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_session_sends_auth_and_goes_live() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    assert_eq!(session.state(), ConnectionState::Idle);
    session.start().unwrap();

    let (peer, body) = accept(&mut peers).await;
    assert_eq!(peer.room_id(), ROOM);
    assert_eq!(
        body,
        json!({"uid": 0, "roomid": ROOM, "protover": 3, "platform": "web", "type": 2})
    );
    assert_eq!(session.state(), ConnectionState::Authenticating);

    peer.send(auth_reply(0)).unwrap();
    let mut states = session.subscribe_state();
    states.wait_for(|s| *s == ConnectionState::Live).await.unwrap();

    session.stop_and_close().await;
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(session.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_auth_timeout_closes_session() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    let started = Instant::now();
    session.start().unwrap();

    // Accept but never answer.
    let (peer, _) = accept(&mut peers).await;

    let err = session.join().await.unwrap_err();
    assert!(matches!(*err, SessionError::AuthTimeout(d) if d == Duration::from_secs(5)));
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejected_is_fatal() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();

    let (peer, _) = accept(&mut peers).await;
    peer.send(auth_reply(-101)).unwrap();

    let err = session.join().await.unwrap_err();
    assert!(matches!(*err, SessionError::Auth { code: -101 }));
    assert!(err.is_token_error());
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_connect_refused_is_transport_error() {
    let (connector, _peers) = MemoryConnector::new();
    connector.refuse(ROOM);
    let context = Arc::new(NetworkContext::anonymous(connector));
    let session = RoomSession::new(ROOM, context, Arc::new(Recorder::default()));

    session.start().unwrap();
    let err = session.join().await.unwrap_err();
    assert!(matches!(*err, SessionError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn test_server_close_before_auth_is_transport_error() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();

    let (mut peer, _) = accept(&mut peers).await;
    peer.disconnect();

    let err = session.join().await.unwrap_err();
    assert!(matches!(*err, SessionError::Transport(_)));
}

// =========================================================================
// start / stop / join
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_twice_fails() {
    let (session, _peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_closes_immediately() {
    let (session, _peers) = session(Arc::new(Recorder::default()));
    session.stop();
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(session.join().await.is_ok());
    assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_join_with_silent_peer_within_grace() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    // The peer stays connected and never sends anything again.
    let started = Instant::now();
    session.stop();
    time::timeout(Duration::from_secs(2), session.join())
        .await
        .expect("join should return within the grace period")
        .expect("a requested stop is not an error");

    assert!(started.elapsed() <= Duration::from_secs(2));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_close_is_idempotent() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    let _peer = go_live(&session, &mut peers).await;

    session.stop_and_close().await;
    session.stop_and_close().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_while_live_ends_cleanly() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    let mut peer = go_live(&session, &mut peers).await;

    peer.disconnect();
    assert!(session.join().await.is_ok());
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_bad_framing_is_fatal_protocol_error() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    // Header length 12 instead of 16.
    let mut bytes = command(json!({"cmd": "X"}));
    bytes[5] = 12;
    peer.send(bytes).unwrap();

    let err = session.join().await.unwrap_err();
    assert!(matches!(*err, SessionError::Protocol(_)));
}

// =========================================================================
// Event delivery
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_with_malformed_middle_message_delivers_the_rest() {
    let recorder = Arc::new(Recorder::default());
    let (session, mut peers) = session(recorder.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    let mut inner = command(danmaku(json!("first")));
    // Text slot holds a number: the command is known but malformed.
    inner.extend(command(danmaku(json!(17))));
    inner.extend(command(json!({
        "cmd": "SEND_GIFT",
        "data": {"giftName": "rose", "num": 1, "uname": "g", "uid": 3},
    })));
    peer.send(protocol::encode_batch(ProtocolVersion::Brotli, &inner).unwrap())
        .unwrap();

    eventually(|| session.stats().events_dispatched == 2).await;
    assert_eq!(recorder.events(), ["danmaku:first", "gift:rose"]);

    let stats = session.stats();
    assert_eq!(stats.malformed_messages, 1);
    // Auth reply plus three commands.
    assert_eq!(stats.frames_received, 4);
    assert_eq!(session.state(), ConnectionState::Live);

    session.stop_and_close().await;
    assert!(session.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_json_is_skipped_not_fatal() {
    let recorder = Arc::new(Recorder::default());
    let (session, mut peers) = session(recorder.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    peer.send(server_frame(Operation::SendMsgReply, b"{truncated")).unwrap();
    peer.send(command(danmaku(json!("after")))).unwrap();

    eventually(|| session.stats().events_dispatched == 1).await;
    assert_eq!(recorder.events(), ["danmaku:after"]);
    assert_eq!(session.stats().malformed_messages, 1);
    assert_eq!(session.state(), ConnectionState::Live);
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_reaches_on_unknown() {
    let recorder = Arc::new(Recorder::default());
    let (session, mut peers) = session(recorder.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    peer.send(command(json!({"cmd": "ONLINE_RANK_COUNT", "data": {"count": 9}})))
        .unwrap();
    peer.send(command(json!({"cmd": "ONLINE_RANK_COUNT", "data": {"count": 10}})))
        .unwrap();
    peer.send(command(json!({"data": "no cmd at all"}))).unwrap();

    eventually(|| session.stats().events_dispatched == 3).await;
    assert_eq!(
        recorder.events(),
        ["unknown:ONLINE_RANK_COUNT", "unknown:ONLINE_RANK_COUNT", "unknown:?"]
    );
    assert_eq!(session.stats().malformed_messages, 0);
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_popularity_is_delivered_and_recorded() {
    let recorder = Arc::new(Recorder::default());
    let (session, mut peers) = session(recorder.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    assert_eq!(session.stats().last_popularity, None);
    peer.send(server_frame(Operation::HeartbeatReply, &4321u32.to_be_bytes()))
        .unwrap();

    eventually(|| session.stats().last_popularity == Some(4321)).await;
    assert_eq!(recorder.events(), ["popularity:4321"]);
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_is_skipped() {
    let recorder = Arc::new(Recorder::default());
    let (session, mut peers) = session(recorder.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    let mut bytes = server_frame(Operation::Unknown(99), b"whatever");
    bytes.extend(command(danmaku(json!("still here"))));
    peer.send(bytes).unwrap();

    eventually(|| session.stats().events_dispatched == 1).await;
    assert_eq!(recorder.events(), ["danmaku:still here"]);
    assert_eq!(session.state(), ConnectionState::Live);
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_handler_failures_are_counted_and_isolated() {
    let handler = Arc::new(Faulty::default());
    let (session, mut peers) = session(handler.clone());
    session.start().unwrap();
    let peer = go_live(&session, &mut peers).await;

    peer.send(command(danmaku(json!("boom")))).unwrap();
    peer.send(command(json!({
        "cmd": "SEND_GIFT",
        "data": {"giftName": "rose", "num": 1, "uname": "g", "uid": 3},
    })))
    .unwrap();
    peer.send(command(json!({"cmd": "AFTER_FAILURES"}))).unwrap();

    eventually(|| session.stats().events_dispatched == 3).await;
    assert_eq!(session.stats().handler_failures, 2);
    assert_eq!(handler.inner.events(), ["unknown:AFTER_FAILURES"]);
    assert_eq!(session.state(), ConnectionState::Live);

    session.stop_and_close().await;
    assert!(session.join().await.is_ok());
}

// =========================================================================
// Heartbeats
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_three_periods_send_exactly_three_heartbeats() {
    let (session, mut peers) = session(Arc::new(Recorder::default()));
    session.start().unwrap();
    let mut peer = go_live(&session, &mut peers).await;

    // Nothing goes out immediately after auth.
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(count_heartbeats(&mut peer), 0);

    // Beats are due at 30 s, 60 s and 90 s after going live.
    time::sleep(Duration::from_secs(94)).await;
    assert_eq!(count_heartbeats(&mut peer), 3);
    assert_eq!(session.stats().heartbeats_sent, 3);
    assert_eq!(session.stats().late_heartbeats, 0);
    assert_eq!(session.stats().missed_heartbeats, 0);

    session.stop();
    session.join().await.unwrap();
    time::sleep(Duration::from_secs(120)).await;
    assert_eq!(count_heartbeats(&mut peer), 0);
    assert_eq!(session.stats().heartbeats_sent, 3);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_interval_is_configurable() {
    let config = SessionConfig::default().with_heartbeat_interval(Duration::from_secs(10));
    let (session, mut peers) = session_with(Arc::new(Recorder::default()), config);
    session.start().unwrap();
    let mut peer = go_live(&session, &mut peers).await;

    time::sleep(Duration::from_secs(35)).await;
    assert_eq!(count_heartbeats(&mut peer), 3);
    session.stop_and_close().await;
}

#[tokio::test(start_paused = true)]
async fn test_sub_microsecond_heartbeat_jitter_keeps_session_live() {
    let config = SessionConfig::default().with_heartbeat_jitter(Duration::from_nanos(500));
    let (session, mut peers) = session_with(Arc::new(Recorder::default()), config);
    session.start().unwrap();
    let mut peer = go_live(&session, &mut peers).await;

    time::sleep(Duration::from_secs(31)).await;
    assert_eq!(count_heartbeats(&mut peer), 1);
    assert_eq!(session.state(), ConnectionState::Live);

    session.stop();
    session.join().await.unwrap();
}

// =========================================================================
// Unbounded durations
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_max_durations_wait_instead_of_failing() {
    let config = SessionConfig::default()
        .with_auth_timeout(Duration::MAX)
        .with_shutdown_grace(Duration::MAX)
        .with_heartbeat_interval(Duration::MAX);
    let (session, mut peers) = session_with(Arc::new(Recorder::default()), config);
    session.start().unwrap();

    let (mut peer, _) = accept(&mut peers).await;
    time::sleep(Duration::from_secs(600)).await;
    assert_eq!(session.state(), ConnectionState::Authenticating);

    peer.send(auth_reply(0)).unwrap();
    eventually(|| session.state() == ConnectionState::Live).await;
    time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(count_heartbeats(&mut peer), 0);

    session.stop();
    session.join().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Closed);
}
