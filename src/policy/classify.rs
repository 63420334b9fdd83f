use std::collections::HashSet;
use std::time::Duration;

use crate::detect::{Category, Classification, LabelMap};

use super::{CooldownBoundary, RateLimiter, DEFAULT_COOLDOWN};

/// Confidence above which a frame is visually flagged.
pub const DEFAULT_FLAG_THRESHOLD: f32 = 0.95;
pub const DEFAULT_FEEDING_MESSAGE: &str = "Visitor is Feeding!";

/// What the feeding monitor should do with one classified frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassificationDecision {
    /// Category to draw on the frame, when the classifier is confident enough.
    pub flagged: Option<Category>,
    /// Raw label text for the winning class.
    pub label: Option<String>,
    /// Clamped confidence of the winning class.
    pub confidence: Option<f32>,
    /// Message to send, when this frame wins the rate limiter.
    pub notify: Option<String>,
}

/// Feeding/petting decision policy.
#[derive(Clone, Debug)]
pub struct ClassificationPolicy {
    labels: LabelMap,
    flag_threshold: f32,
    alert_categories: HashSet<Category>,
    message: String,
    limiter: RateLimiter,
}

impl ClassificationPolicy {
    /// Policy with the stock threshold, cooldown, and `{Feeding, Petting}`
    /// alert set.
    pub fn new(labels: LabelMap) -> Self {
        Self {
            labels,
            flag_threshold: DEFAULT_FLAG_THRESHOLD,
            alert_categories: [Category::Feeding, Category::Petting].into_iter().collect(),
            message: DEFAULT_FEEDING_MESSAGE.to_string(),
            limiter: RateLimiter::new(DEFAULT_COOLDOWN, CooldownBoundary::Exclusive),
        }
    }

    pub fn with_flag_threshold(mut self, threshold: f32) -> Self {
        self.flag_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.limiter = RateLimiter::new(cooldown, CooldownBoundary::Exclusive);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_alert_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.alert_categories = categories.into_iter().collect();
        self
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide what to do with one classifier result observed at `now`.
    pub fn evaluate(
        &mut self,
        classification: Option<Classification>,
        now: Duration,
    ) -> ClassificationDecision {
        let Some(classification) = classification else {
            log::debug!("no classification for frame");
            return ClassificationDecision::default();
        };
        if !classification.confidence.is_finite() {
            log::debug!(
                "ignoring non-finite confidence for label {}",
                classification.label_index
            );
            return ClassificationDecision::default();
        }
        let (Some(label), Some(category)) = (
            self.labels.label(classification.label_index),
            self.labels.category(classification.label_index),
        ) else {
            log::debug!(
                "label index {} outside label map of {}",
                classification.label_index,
                self.labels.len()
            );
            return ClassificationDecision::default();
        };

        let confidence = classification.confidence.clamp(0.0, 1.0);
        let mut decision = ClassificationDecision {
            flagged: None,
            label: Some(label.to_string()),
            confidence: Some(confidence),
            notify: None,
        };
        if confidence <= self.flag_threshold {
            return decision;
        }
        decision.flagged = Some(category.clone());

        if self.alert_categories.contains(category) && self.limiter.try_acquire(now) {
            decision.notify = Some(self.message.clone());
        }
        decision
    }
}
