//! Decision policies: turn raw model output into alert decisions.
//!
//! Each policy owns its own [`RateLimiter`], so independent monitors never
//! share notification state, and reads time through an injected [`Clock`].

pub mod classify;
pub mod intrusion;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use classify::{ClassificationDecision, ClassificationPolicy};
pub use intrusion::{white_percentage, AlertIndicator, AlertState, IntrusionDecision, IntrusionPolicy};

/// Minimum spacing between notifications used by both monitors.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Monotonic time source.
pub trait Clock {
    /// Time elapsed since the clock's origin. Never decreases.
    fn now(&self) -> Duration;
}

/// Wall-clock implementation backed by `Instant`.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and simulations.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the monitor.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        let target = at.as_millis() as u64;
        self.millis.fetch_max(target, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// How the cooldown boundary itself is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CooldownBoundary {
    /// Send only when strictly more than the cooldown has passed.
    #[default]
    Exclusive,
    /// Send once at least the cooldown has passed.
    Inclusive,
}

/// Notification rate limiter: the policy's `last_sent` memory.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    cooldown: Duration,
    boundary: CooldownBoundary,
    last_sent: Option<Duration>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration, boundary: CooldownBoundary) -> Self {
        Self {
            cooldown,
            boundary,
            last_sent: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_sent(&self) -> Option<Duration> {
        self.last_sent
    }

    /// Whether a notification at `now` would be allowed. Does not mutate.
    pub fn ready(&self, now: Duration) -> bool {
        let Some(last) = self.last_sent else {
            return true;
        };
        let elapsed = now.saturating_sub(last);
        match self.boundary {
            CooldownBoundary::Exclusive => elapsed > self.cooldown,
            CooldownBoundary::Inclusive => elapsed >= self.cooldown,
        }
    }

    /// Claim a send slot at `now`. Returns true and records `now` when allowed.
    ///
    /// The slot is claimed before the transport runs, so a failed send still
    /// holds off the next attempt for a full cooldown.
    pub fn try_acquire(&mut self, now: Duration) -> bool {
        if !self.ready(now) {
            return false;
        }
        self.last_sent = Some(match self.last_sent {
            Some(last) => last.max(now),
            None => now,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn first_event_always_sends() {
        let mut limiter = RateLimiter::new(DEFAULT_COOLDOWN, CooldownBoundary::Exclusive);
        assert!(limiter.try_acquire(Duration::ZERO));
        assert_eq!(limiter.last_sent(), Some(Duration::ZERO));
    }

    #[test]
    fn exclusive_boundary_blocks_exactly_cooldown() {
        let mut limiter = RateLimiter::new(DEFAULT_COOLDOWN, CooldownBoundary::Exclusive);
        let sent: Vec<u64> = [0, 2, 5, 6, 10, 11, 12]
            .into_iter()
            .filter(|t| limiter.try_acquire(secs(*t)))
            .collect();
        assert_eq!(sent, vec![0, 6, 12]);
    }

    #[test]
    fn inclusive_boundary_allows_exactly_cooldown() {
        let mut limiter = RateLimiter::new(DEFAULT_COOLDOWN, CooldownBoundary::Inclusive);
        let sent: Vec<u64> = [0, 2, 5, 6, 10, 11]
            .into_iter()
            .filter(|t| limiter.try_acquire(secs(*t)))
            .collect();
        assert_eq!(sent, vec![0, 5, 10]);
    }

    #[test]
    fn last_sent_never_decreases() {
        let mut limiter = RateLimiter::new(Duration::ZERO, CooldownBoundary::Inclusive);
        assert!(limiter.try_acquire(secs(10)));
        assert!(limiter.try_acquire(secs(3)));
        assert_eq!(limiter.last_sent(), Some(secs(10)));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        handle.advance(secs(3));
        assert_eq!(clock.now(), secs(3));
        clock.set(secs(1));
        assert_eq!(handle.now(), secs(3));
    }
}
