//! Session configuration and connection state machine.

use std::time::Duration;

use livedm_heartbeat::{BeatPolicy, HeartbeatConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Tunables for one [`RoomSession`](crate::RoomSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time between heartbeat frames once live.
    pub heartbeat_interval: Duration,

    /// How long to wait for the auth reply after sending the auth frame.
    pub auth_timeout: Duration,

    /// Upper bound on how long shutdown may take after `stop()`, even if
    /// the server never answers the close.
    pub shutdown_grace: Duration,

    /// Random delay (0..=max) added to the first heartbeat.
    pub heartbeat_jitter: Duration,

    /// How heartbeats are rescheduled after the task was stalled.
    #[serde(default)]
    pub heartbeat_policy: BeatPolicy,

    /// `protover` sent in the auth body. 3 asks the server for brotli
    /// batches, 2 for zlib.
    pub protocol_version: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            heartbeat_jitter: Duration::ZERO,
            heartbeat_policy: BeatPolicy::Skip,
            protocol_version: 3,
        }
    }
}

impl SessionConfig {
    const MIN_TIMEOUT: Duration = Duration::from_millis(1);
    /// Deadlines are computed as `Instant + timeout`, so "forever" is
    /// capped at a day.
    const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_heartbeat_jitter(mut self, jitter: Duration) -> Self {
        self.heartbeat_jitter = jitter;
        self
    }

    pub fn with_heartbeat_policy(mut self, policy: BeatPolicy) -> Self {
        self.heartbeat_policy = policy;
        self
    }

    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when a session is created. Rules:
    /// - `heartbeat_interval` kept within the heartbeat timer's bounds.
    /// - `auth_timeout` and `shutdown_grace` kept within 1 ms..=1 day.
    /// - `protocol_version` other than 2 or 3 is reset to 3.
    pub fn validated(mut self) -> Self {
        if self.heartbeat_interval < HeartbeatConfig::MIN_INTERVAL {
            warn!(
                interval_ms = self.heartbeat_interval.as_millis() as u64,
                "heartbeat_interval below minimum, clamping"
            );
            self.heartbeat_interval = HeartbeatConfig::MIN_INTERVAL;
        }
        if self.heartbeat_interval > HeartbeatConfig::MAX_INTERVAL {
            warn!("heartbeat_interval above maximum, clamping");
            self.heartbeat_interval = HeartbeatConfig::MAX_INTERVAL;
        }
        self.auth_timeout = self.auth_timeout.clamp(Self::MIN_TIMEOUT, Self::MAX_TIMEOUT);
        self.shutdown_grace = self
            .shutdown_grace
            .clamp(Self::MIN_TIMEOUT, Self::MAX_TIMEOUT);
        if !matches!(self.protocol_version, 2 | 3) {
            warn!(
                protocol_version = self.protocol_version,
                "unsupported protocol_version, using 3"
            );
            self.protocol_version = 3;
        }
        self
    }

    /// The heartbeat timer settings derived from this config.
    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat_interval,
            policy: self.heartbeat_policy,
            initial_jitter: self.heartbeat_jitter,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// States are ordered and transitions only ever move forward:
///
/// ```text
/// Idle → Connecting → Authenticating → Live → Stopping → Closed
/// ```
///
/// Skipping ahead is allowed (`Idle → Closed` when stopped before start,
/// `Authenticating → Closed` on auth timeout); going back never is. A
/// session that reached `Closed` is spent: create a new one to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Created, `start()` not called yet.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Auth frame sent, waiting for the reply.
    Authenticating,
    /// Authenticated; events flow and heartbeats are sent.
    Live,
    /// Shutting down: loops are being cancelled and the transport closed.
    Stopping,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if moving to `target` goes forward.
    pub fn can_transition_to(self, target: Self) -> bool {
        target > self
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_terminating(self) -> bool {
        self >= Self::Stopping
    }

    /// Returns `true` while the session holds an open transport.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Authenticating | Self::Live)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Live => "Live",
            Self::Stopping => "Stopping",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}
