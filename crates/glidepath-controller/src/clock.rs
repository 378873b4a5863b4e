//! Wall-clock milliseconds anchored on the tokio clock.
//!
//! Rollout state stores epoch milliseconds, while timers run on
//! `tokio::time`. Deriving one from the other keeps both consistent and
//! lets tests drive everything with paused time.

use std::time::Duration;

use tokio::time::Instant;

use glidepath_state::epoch_millis;

/// Stand-in for deadlines too far out for `Instant` arithmetic.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_ms: u64,
    anchor: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(epoch_millis())
    }

    /// A clock that reads `epoch_ms` now.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            anchor_ms: epoch_ms,
            anchor: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.anchor_ms
            .saturating_add(self.anchor.elapsed().as_millis() as u64)
    }

    /// The tokio instant at which `now_ms()` reaches `epoch_ms`. Past
    /// times map to the anchor, which has already elapsed.
    pub fn instant_at(&self, epoch_ms: u64) -> Instant {
        let offset = Duration::from_millis(epoch_ms.saturating_sub(self.anchor_ms));
        self.anchor + offset.min(FAR_FUTURE)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
