use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::{BoundingBox, PixelRect};
use crate::frame::Frame;

use super::{CooldownBoundary, RateLimiter, DEFAULT_COOLDOWN};

/// Channel range that counts as "white" in the colour heuristic.
pub const WHITE_RANGE: RangeInclusive<u8> = 140..=255;
pub const DEFAULT_WHITE_THRESHOLD: u8 = 30;
pub const DEFAULT_INTRUDER_MESSAGE: &str = "Intruder Alert!";

/// Percentage (0..=100) of pixels in `rect` whose channels all fall in
/// [`WHITE_RANGE`]. An empty rectangle scores 0.
pub fn white_percentage(frame: &Frame, rect: &PixelRect) -> f64 {
    let area = rect.area();
    if area == 0 {
        return 0.0;
    }
    let image = frame.image();
    let mut white = 0u64;
    for y in rect.y_min..rect.y_max {
        for x in rect.x_min..rect.x_max {
            let pixel = image.get_pixel(x, y);
            if pixel.0.iter().all(|channel| WHITE_RANGE.contains(channel)) {
                white += 1;
            }
        }
    }
    white as f64 * 100.0 / area as f64
}

/// Outcome of one frame through the intrusion policy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntrusionDecision {
    /// Boxes that failed the colour check.
    pub suspicious: Vec<BoundingBox>,
    pub notify: Option<String>,
}

/// Colour-heuristic intruder policy.
#[derive(Clone, Debug)]
pub struct IntrusionPolicy {
    threshold: u8,
    message: String,
    limiter: RateLimiter,
}

impl IntrusionPolicy {
    pub fn new(threshold: u8) -> Result<Self> {
        if threshold > 100 {
            return Err(anyhow!(
                "white threshold must be between 0 and 100, got {}",
                threshold
            ));
        }
        Ok(Self {
            threshold,
            message: DEFAULT_INTRUDER_MESSAGE.to_string(),
            limiter: RateLimiter::new(DEFAULT_COOLDOWN, CooldownBoundary::Inclusive),
        })
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.limiter = RateLimiter::new(cooldown, CooldownBoundary::Inclusive);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Whether one box looks like an intruder. Boxes with no area inside the
    /// frame never are.
    pub fn is_suspicious(&self, frame: &Frame, bbox: &BoundingBox) -> bool {
        match bbox.clip_to(frame.width(), frame.height()) {
            Some(rect) => white_percentage(frame, &rect) < self.threshold as f64,
            None => false,
        }
    }

    pub fn evaluate(&mut self, frame: &Frame, boxes: &[BoundingBox], now: Duration) -> IntrusionDecision {
        let suspicious: Vec<BoundingBox> = boxes
            .iter()
            .filter(|bbox| self.is_suspicious(frame, bbox))
            .copied()
            .collect();
        let notify = if !suspicious.is_empty() && self.limiter.try_acquire(now) {
            Some(self.message.clone())
        } else {
            None
        };
        IntrusionDecision { suspicious, notify }
    }
}

/// On-screen alert indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    NoAlert,
    Alert,
}

/// Two-state indicator that reports only transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlertIndicator {
    state: AlertState,
}

impl AlertIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Feed the suspicious-box count of one frame. Returns the new state when
    /// it changed.
    pub fn observe(&mut self, suspicious: usize) -> Option<AlertState> {
        let next = if suspicious > 0 {
            AlertState::Alert
        } else {
            AlertState::NoAlert
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}
