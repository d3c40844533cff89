//! Integration tests for `ClientPool` over the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use livedm_pool::{ClientPool, PoolError};
use livedm_protocol::{self as protocol, GiftMessage, Operation, ProtocolVersion, RoomId};
use livedm_session::{ConnectionState, Handler, HandlerResult, NetworkContext, SessionError};
use livedm_transport::{MemoryConnector, MemoryPeer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time;

// =========================================================================
// Helpers
// =========================================================================

struct Quiet;

impl Handler for Quiet {}

/// Records gift names with the room they arrived in.
#[derive(Default)]
struct Gifts {
    seen: Mutex<Vec<(RoomId, String)>>,
}

impl Handler for Gifts {
    fn on_gift(&self, room: RoomId, msg: &GiftMessage) -> HandlerResult {
        self.seen.lock().unwrap().push((room, msg.gift_name.clone()));
        Ok(())
    }
}

fn pool() -> (ClientPool<MemoryConnector>, UnboundedReceiver<MemoryPeer>) {
    let (connector, peers) = MemoryConnector::new();
    let context = Arc::new(NetworkContext::anonymous(connector));
    (ClientPool::new(context), peers)
}

fn auth_ok() -> Vec<u8> {
    protocol::encode_with_version(
        Operation::AuthReply,
        ProtocolVersion::Normal,
        br#"{"code":0}"#,
    )
    .unwrap()
}

fn gift(name: &str) -> Vec<u8> {
    let body = format!(
        r#"{{"cmd":"SEND_GIFT","data":{{"giftName":"{name}","num":1,"uname":"fan","uid":3}}}}"#
    );
    protocol::encode_with_version(Operation::SendMsgReply, ProtocolVersion::Normal, body.as_bytes())
        .unwrap()
}

/// Accepts the next connection and drains its auth frame.
async fn accept(peers: &mut UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    let mut peer = peers.recv().await.expect("a session should connect");
    peer.recv().await.expect("auth frame");
    peer
}

// =========================================================================
// Membership
// =========================================================================

#[tokio::test]
async fn test_add_room_rejects_duplicates() {
    let (mut pool, _peers) = pool();
    pool.add_room(1, Arc::new(Quiet)).unwrap();
    pool.add_room(2, Arc::new(Quiet)).unwrap();

    let err = pool.add_room(1, Arc::new(Quiet)).unwrap_err();
    assert!(matches!(err, PoolError::DuplicateRoom(RoomId(1))));
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.room_ids(), [RoomId(1), RoomId(2)]);
}

#[tokio::test]
async fn test_remove_room_closes_and_forgets() {
    let (mut pool, _peers) = pool();
    pool.add_room(1, Arc::new(Quiet)).unwrap();
    pool.add_room(2, Arc::new(Quiet)).unwrap();

    pool.remove_room(1).await.unwrap();
    assert_eq!(pool.room_ids(), [RoomId(2)]);
    assert!(pool.session(1).is_none());

    assert!(matches!(
        pool.remove_room(1).await,
        Err(PoolError::RoomNotFound(RoomId(1)))
    ));
}

#[tokio::test]
async fn test_new_pool_is_empty() {
    let (pool, _peers) = pool();
    assert!(pool.is_empty());
    assert!(pool.states().is_empty());
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_start_all_collects_failures_without_short_circuit() {
    let (mut pool, _peers) = pool();
    pool.add_room(1, Arc::new(Quiet)).unwrap();
    pool.add_room(2, Arc::new(Quiet)).unwrap();
    pool.add_room(3, Arc::new(Quiet)).unwrap();

    // Room 2 is already running; the others must still start.
    pool.session(2).unwrap().start().unwrap();
    let failures = pool.start_all();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, RoomId(2));
    assert!(matches!(failures[0].1, SessionError::AlreadyStarted));
    for (_, state) in pool.states() {
        assert_ne!(state, ConnectionState::Idle);
    }

    pool.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_auth_timeout_and_one_live_room_yield_exactly_one_error() {
    let (mut pool, mut peers) = pool();
    let gifts = Arc::new(Gifts::default());
    pool.add_room(100, gifts.clone()).unwrap();
    pool.add_room(200, gifts.clone()).unwrap();
    assert!(pool.start_all().is_empty());

    // Only room 200 gets an auth reply.
    let mut kept = Vec::new();
    for _ in 0..2 {
        let peer = accept(&mut peers).await;
        if peer.room_id() == 200 {
            peer.send(auth_ok()).unwrap();
        }
        kept.push(peer);
    }

    // Past the 5 s auth timeout.
    time::sleep(Duration::from_secs(6)).await;
    let states = pool.states();
    assert_eq!(states[0], (RoomId(100), ConnectionState::Closed));
    assert_eq!(states[1], (RoomId(200), ConnectionState::Live));

    // The timed-out room doesn't disturb delivery in the live one.
    let live = kept.iter().find(|p| p.room_id() == 200).unwrap();
    live.send(gift("rose")).unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        *gifts.seen.lock().unwrap(),
        [(RoomId(200), "rose".to_string())]
    );
    assert_eq!(pool.session(200).unwrap().stats().events_dispatched, 1);

    let outcomes = pool.stop_all().await;
    assert!(pool.is_empty());
    assert_eq!(outcomes.len(), 2);

    let errors: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_err()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, RoomId(100));
    assert!(matches!(
        **errors[0].1.as_ref().unwrap_err(),
        SessionError::AuthTimeout(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_join_all_reports_in_insertion_order() {
    let (connector, mut peers) = MemoryConnector::new();
    connector.refuse(3);
    let context = Arc::new(NetworkContext::anonymous(connector));
    let mut pool = ClientPool::new(context);
    for room in [5, 3, 9] {
        pool.add_room(room, Arc::new(Quiet)).unwrap();
    }
    pool.start_all();

    // Rooms 5 and 9 go live and are then hung up on by the server.
    for _ in 0..2 {
        let mut peer = accept(&mut peers).await;
        peer.send(auth_ok()).unwrap();
        peer.disconnect();
    }

    let outcomes = pool.join_all().await;
    let rooms: Vec<_> = outcomes.iter().map(|(r, _)| *r).collect();
    assert_eq!(rooms, [RoomId(5), RoomId(3), RoomId(9)]);
    assert!(outcomes[0].1.is_ok());
    assert!(matches!(
        **outcomes[1].1.as_ref().unwrap_err(),
        SessionError::Transport(_)
    ));
    assert!(outcomes[2].1.is_ok());
}
