//! Watches one or more live rooms and logs what happens in them.
//!
//! ```text
//! ROOM_IDS=21452505,7734200 SESSDATA=... RUST_LOG=info cargo run -p room-watch
//! ```
//!
//! The first room is watched alone for a few seconds, then every room is
//! watched together through a pool until Ctrl-C.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use livedm::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ROOM: u64 = 21_452_505;
const SOLO_WATCH: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

struct Logger;

impl Handler for Logger {
    fn on_danmaku(&self, room: RoomId, msg: &DanmakuMessage) -> HandlerResult {
        info!(%room, uname = %msg.uname, "{}", msg.msg);
        Ok(())
    }

    fn on_gift(&self, room: RoomId, msg: &GiftMessage) -> HandlerResult {
        info!(%room, uname = %msg.uname, num = msg.num, paid = msg.is_paid(), "gift {}", msg.gift_name);
        Ok(())
    }

    fn on_super_chat(&self, room: RoomId, msg: &SuperChatMessage) -> HandlerResult {
        info!(%room, uname = %msg.uname(), price = msg.price, "super chat: {}", msg.message);
        Ok(())
    }

    fn on_user_toast_v2(&self, room: RoomId, msg: &UserToastV2Message) -> HandlerResult {
        info!(
            %room,
            uname = %msg.username(),
            guard_level = msg.guard_level(),
            num = msg.num(),
            unit = %msg.unit(),
            "guard purchase"
        );
        Ok(())
    }

    fn on_interact_word(&self, room: RoomId, msg: &InteractWordMessage) -> HandlerResult {
        if msg.kind() == InteractKind::Enter {
            info!(%room, uname = %msg.username(), "entered");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), LiveError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let rooms = parse_room_ids(std::env::var("ROOM_IDS").ok().as_deref());
    let cookie = std::env::var("SESSDATA").ok().map(|v| format!("SESSDATA={v}"));
    if cookie.is_none() {
        warn!("SESSDATA not set, watching anonymously (user names may be masked)");
    }

    let mut config = WebSocketConfig::default();
    config.cookie = cookie;
    let context = Arc::new(NetworkContext::anonymous(WebSocketConnector::new(config)));
    let handler: Arc<dyn Handler> = Arc::new(Logger);

    // One room on its own.
    let session = RoomSession::new(rooms[0], Arc::clone(&context), Arc::clone(&handler));
    session.start()?;
    tokio::time::sleep(SOLO_WATCH).await;
    session.stop();
    if let Err(e) = session.join().await {
        warn!(room = %session.room_id(), error = %e, "session ended with error");
    }
    info!(stats = ?session.stats(), "solo watch finished");
    session.stop_and_close().await;

    // Every room together.
    let mut pool = ClientPool::new(context);
    for room in &rooms {
        pool.add_room(*room, Arc::clone(&handler))?;
    }
    for (room, error) in pool.start_all() {
        warn!(%room, %error, "room did not start");
    }

    tokio::select! {
        outcomes = pool.join_all() => report(&outcomes),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    report(&pool.stop_all().await);
    Ok(())
}

fn report(outcomes: &[RoomOutcome]) {
    for (room, outcome) in outcomes {
        match outcome {
            Ok(()) => info!(%room, "closed"),
            Err(e) => warn!(%room, error = %e, "closed with error"),
        }
    }
}

/// Parses a comma-separated room list, skipping blanks, junk and repeats
/// (first occurrence wins). Falls back to a single default room when
/// nothing usable is given.
fn parse_room_ids(raw: Option<&str>) -> Vec<u64> {
    let mut rooms: Vec<u64> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    let mut seen = HashSet::new();
    rooms.retain(|room| seen.insert(*room));
    if rooms.is_empty() {
        rooms.push(DEFAULT_ROOM);
    }
    rooms
}
