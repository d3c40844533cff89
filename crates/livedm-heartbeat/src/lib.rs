//! Fixed-period heartbeat timer for livedm.
//!
//! The live-room server drops a connection that stays quiet for too long,
//! so every live session sends a heartbeat frame on a fixed period. This
//! crate owns only the *timing*: when the next beat is due, whether the
//! previous one fired late, and how to reschedule after a stall. Writing
//! the frame is the session's job.
//!
//! # Integration
//!
//! The timer is designed to sit inside a task's `tokio::select!` loop:
//!
//! ```ignore
//! let mut timer = HeartbeatTimer::new(config);
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         beat = timer.wait_for_beat() => send_heartbeat(beat).await?,
//!     }
//! }
//! ```
//!
//! The first beat fires one full `interval` after the timer is created
//! (plus optional jitter), never immediately.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to reschedule after a beat fires late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeatPolicy {
    /// Restart the period from the late beat. Missed beats are dropped.
    #[default]
    Skip,
    /// Stay on the original grid: the next beat fires at the next grid
    /// point after now. Missed beats are still dropped, never burst.
    FixedCadence,
}

/// Configuration for a [`HeartbeatTimer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time between beats. Default: 30 s.
    pub interval: Duration,
    pub policy: BeatPolicy,
    /// Random delay (0..=max) added to the *first* beat so many sessions
    /// started together don't beat in lockstep. Default: none.
    pub initial_jitter: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            policy: BeatPolicy::default(),
            initial_jitter: Duration::ZERO,
        }
    }
}

impl HeartbeatConfig {
    /// What the official web client uses.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

    /// Shortest accepted interval.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// Longest accepted interval. Keeps deadline arithmetic on `Instant`
    /// in range.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// A config for a specific interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`HeartbeatTimer::new`]. Rules:
    /// - `interval` kept within [`Self::MIN_INTERVAL`]..=[`Self::MAX_INTERVAL`].
    /// - `initial_jitter` capped at one `interval`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "heartbeat interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.interval > Self::MAX_INTERVAL {
            warn!(
                max_ms = Self::MAX_INTERVAL.as_millis() as u64,
                "heartbeat interval above maximum, clamping"
            );
            self.interval = Self::MAX_INTERVAL;
        }
        if self.initial_jitter > self.interval {
            self.initial_jitter = self.interval;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Beat info
// ---------------------------------------------------------------------------

/// Returned by [`HeartbeatTimer::wait_for_beat`] each time a beat is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// Monotonically increasing beat number (starts at 1).
    pub beat: u64,
    /// How far past its deadline the beat woke up.
    pub late_by: Duration,
    /// Whole periods that passed without a beat (0 in normal operation).
    pub missed: u64,
}

impl Beat {
    pub fn is_late(&self) -> bool {
        self.missed > 0
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatMetrics {
    pub total_beats: u64,
    /// Beats that woke more than a tenth of a period late.
    pub late_beats: u64,
    /// Periods dropped because the task was stalled.
    pub missed_beats: u64,
    /// Worst lateness seen.
    pub max_late_by: Duration,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Fixed-period heartbeat timer. One per live session.
pub struct HeartbeatTimer {
    config: HeartbeatConfig,
    beat_count: u64,
    next_beat: Instant,
    metrics: HeartbeatMetrics,
}

impl HeartbeatTimer {
    pub fn new(config: HeartbeatConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::rng().random_range(Duration::ZERO..=config.initial_jitter)
        };
        let next_beat = Instant::now() + config.interval + jitter;

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            policy = ?config.policy,
            "heartbeat timer created"
        );

        Self {
            config,
            beat_count: 0,
            next_beat,
            metrics: HeartbeatMetrics::default(),
        }
    }

    /// A timer for a specific interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(HeartbeatConfig::with_interval(interval))
    }

    /// Waits until the next beat is due.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// schedule untouched.
    pub async fn wait_for_beat(&mut self) -> Beat {
        let due = self.next_beat;
        time::sleep_until(due).await;

        let now = Instant::now();
        let interval = self.config.interval;
        let late_by = now.saturating_duration_since(due);
        let missed = (late_by.as_nanos() / interval.as_nanos()) as u64;
        self.beat_count += 1;

        self.next_beat = match self.config.policy {
            BeatPolicy::Skip => now + interval,
            BeatPolicy::FixedCadence => due + interval * (missed as u32 + 1),
        };

        if late_by > interval / 10 {
            self.metrics.late_beats += 1;
            if missed > 0 {
                warn!(
                    beat = self.beat_count,
                    missed,
                    late_ms = late_by.as_millis() as u64,
                    "heartbeat late, skipping missed beats"
                );
            }
        }
        self.metrics.total_beats += 1;
        self.metrics.missed_beats += missed;
        self.metrics.max_late_by = self.metrics.max_late_by.max(late_by);

        trace!(beat = self.beat_count, "heartbeat due");

        Beat {
            beat: self.beat_count,
            late_by,
            missed,
        }
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn metrics(&self) -> &HeartbeatMetrics {
        &self.metrics
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// When the next beat is scheduled.
    pub fn next_beat(&self) -> Instant {
        self.next_beat
    }
}
