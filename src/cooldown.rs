//! Minimum-interval gate between accepted hits

use std::time::Duration;

use tokio::time::Instant;

/// Accepts at most one hit per cooldown window
///
/// The listener and the relay each own one; neither trusts the other's.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    window: Duration,
    last_hit_at: Option<Instant>,
}

impl CooldownGate {
    /// Create a gate with the given window
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_hit_at: None,
        }
    }

    /// Accept a hit at `now` if the window since the last accepted hit has elapsed
    ///
    /// On acceptance the last-hit time moves forward to `now`; it never moves back.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_hit_at {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
            if now < last {
                return false;
            }
        }

        self.last_hit_at = Some(now);
        true
    }

    /// Time left until the gate opens again
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last_hit_at.map_or(Duration::ZERO, |last| {
            self.window
                .saturating_sub(now.saturating_duration_since(last))
        })
    }

    /// When the last hit was accepted
    #[must_use]
    pub const fn last_hit_at(&self) -> Option<Instant> {
        self.last_hit_at
    }

    /// Configured window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
