//! Monitor loops.
//!
//! Both monitors run the same synchronous cycle on the caller's thread:
//! pull a frame, run the detector, feed the policy, send the alert the policy
//! asked for, and hand the result to an observer for presentation. The loop
//! ends when the source is exhausted, the stop flag is raised, or the optional
//! frame limit is reached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::detect::DetectorBackend;
use crate::frame::{Frame, FrameTransform};
use crate::ingest::FrameSource;
use crate::notify::Notifier;
use crate::policy::{
    AlertIndicator, AlertState, ClassificationDecision, ClassificationPolicy, Clock,
    IntrusionDecision, IntrusionPolicy,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.6;

/// User-facing status line attached to a frame report.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "level", content = "text", rename_all = "snake_case")]
pub enum StatusMessage {
    Info(String),
    Warning(String),
}

impl StatusMessage {
    pub fn text(&self) -> &str {
        match self {
            Self::Info(text) | Self::Warning(text) => text,
        }
    }
}

/// Why a monitor loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    SourceExhausted,
    Cancelled,
    FrameLimit,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub frames: u64,
    /// Frames the detector failed on.
    pub skipped: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub stop_reason: StopReason,
}

/// One processed frame from the feeding monitor.
pub struct FeedingReport<'a> {
    pub frame: &'a Frame,
    pub decision: &'a ClassificationDecision,
    pub status: Vec<StatusMessage>,
}

/// One processed frame from the intruder monitor.
pub struct IntruderReport<'a> {
    pub frame: &'a Frame,
    pub decision: &'a IntrusionDecision,
    pub alert_state: AlertState,
    /// Set only on the frame where the indicator changed.
    pub alert_transition: Option<AlertState>,
    pub status: Vec<StatusMessage>,
}

/// Shared loop bookkeeping.
struct LoopState {
    frames: u64,
    skipped: u64,
    sent: u64,
    failed: u64,
    last_health_log: Option<Duration>,
}

impl LoopState {
    fn new() -> Self {
        Self {
            frames: 0,
            skipped: 0,
            sent: 0,
            failed: 0,
            last_health_log: None,
        }
    }

    fn should_stop(&self, stop: &AtomicBool, frame_limit: Option<u64>) -> Option<StopReason> {
        if stop.load(Ordering::SeqCst) {
            return Some(StopReason::Cancelled);
        }
        match frame_limit {
            Some(limit) if self.frames >= limit => Some(StopReason::FrameLimit),
            _ => None,
        }
    }

    fn deliver<N: Notifier>(&mut self, notifier: &mut N, message: &str) -> StatusMessage {
        match notifier.send(message) {
            Ok(()) => {
                self.sent += 1;
                log::info!("alert sent via {}: {}", notifier.name(), message);
                StatusMessage::Info("Alert sent successfully!".to_string())
            }
            Err(e) => {
                self.failed += 1;
                log::warn!("alert via {} failed: {:#}", notifier.name(), e);
                StatusMessage::Warning(format!("Failed to send alert: {:#}", e))
            }
        }
    }

    fn log_health<S: FrameSource>(&mut self, source: &S, now: Duration) {
        let due = match self.last_health_log {
            Some(last) => now.saturating_sub(last) >= HEALTH_LOG_INTERVAL,
            None => true,
        };
        if !due {
            return;
        }
        let stats = source.stats();
        log::info!(
            "source health={} frames={} source={}",
            source.is_healthy(),
            stats.frames_captured,
            stats.source
        );
        self.last_health_log = Some(now);
    }

    fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            frames: self.frames,
            skipped: self.skipped,
            notifications_sent: self.sent,
            notification_failures: self.failed,
            stop_reason,
        }
    }
}

/// Classification pipeline: frames → classifier → feeding policy → alert.
pub struct FeedingMonitor<S, D, N, C> {
    source: S,
    detector: D,
    policy: ClassificationPolicy,
    notifier: N,
    clock: C,
    transform: FrameTransform,
    frame_limit: Option<u64>,
}

impl<S, D, N, C> FeedingMonitor<S, D, N, C>
where
    S: FrameSource,
    D: DetectorBackend,
    N: Notifier,
    C: Clock,
{
    /// `source` must already be connected. Frames are mirrored by default.
    pub fn new(source: S, detector: D, policy: ClassificationPolicy, notifier: N, clock: C) -> Self {
        Self {
            source,
            detector,
            policy,
            notifier,
            clock,
            transform: FrameTransform {
                mirror: true,
                resize: None,
            },
            frame_limit: None,
        }
    }

    pub fn with_transform(mut self, transform: FrameTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn policy(&self) -> &ClassificationPolicy {
        &self.policy
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn run<F>(&mut self, stop: &AtomicBool, mut observer: F) -> Result<RunSummary>
    where
        F: FnMut(&FeedingReport<'_>),
    {
        let mut state = LoopState::new();
        self.detector
            .warm_up()
            .with_context(|| format!("warm up detector '{}'", self.detector.name()))?;

        let reason = loop {
            if let Some(reason) = state.should_stop(stop, self.frame_limit) {
                break reason;
            }
            let Some(mut frame) = self.source.next_frame().context("read next frame")? else {
                break StopReason::SourceExhausted;
            };
            self.transform.apply(&mut frame);
            state.frames += 1;

            let classification = match self.detector.classify(&frame) {
                Ok(classification) => classification,
                Err(e) => {
                    state.skipped += 1;
                    log::warn!("classifier failed on frame {}: {:#}", frame.index, e);
                    continue;
                }
            };
            let now = self.clock.now();
            let decision = self.policy.evaluate(classification, now);
            log::debug!(
                "frame {} label={:?} confidence={:?} flagged={:?}",
                frame.index,
                decision.label,
                decision.confidence,
                decision.flagged
            );

            let mut status = Vec::new();
            if let Some(message) = &decision.notify {
                status.push(state.deliver(&mut self.notifier, message));
            }
            observer(&FeedingReport {
                frame: &frame,
                decision: &decision,
                status,
            });
            state.log_health(&self.source, now);
        };

        log::info!(
            "feeding monitor stopped ({:?}) after {} frames, {} alerts sent",
            reason,
            state.frames,
            state.sent
        );
        Ok(state.summary(reason))
    }
}

/// Pause `pause` after every `every`-th frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePacing {
    pub every: u64,
    pub pause: Duration,
}

impl Default for FramePacing {
    fn default() -> Self {
        Self {
            every: 5,
            pause: Duration::from_millis(30),
        }
    }
}

/// Detection pipeline: frames → object detector → colour check → alert.
pub struct IntruderMonitor<S, D, N, C> {
    source: S,
    detector: D,
    policy: IntrusionPolicy,
    notifier: N,
    clock: C,
    indicator: AlertIndicator,
    transform: FrameTransform,
    min_confidence: f32,
    pacing: Option<FramePacing>,
    frame_limit: Option<u64>,
}

impl<S, D, N, C> IntruderMonitor<S, D, N, C>
where
    S: FrameSource,
    D: DetectorBackend,
    N: Notifier,
    C: Clock,
{
    /// `source` must already be connected. Frames are resized to 640x480 by
    /// default.
    pub fn new(source: S, detector: D, policy: IntrusionPolicy, notifier: N, clock: C) -> Self {
        Self {
            source,
            detector,
            policy,
            notifier,
            clock,
            indicator: AlertIndicator::new(),
            transform: FrameTransform {
                mirror: false,
                resize: Some((640, 480)),
            },
            min_confidence: DEFAULT_DETECTION_CONFIDENCE,
            pacing: Some(FramePacing::default()),
            frame_limit: None,
        }
    }

    pub fn with_transform(mut self, transform: FrameTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_pacing(mut self, pacing: Option<FramePacing>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn policy(&self) -> &IntrusionPolicy {
        &self.policy
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn run<F>(&mut self, stop: &AtomicBool, mut observer: F) -> Result<RunSummary>
    where
        F: FnMut(&IntruderReport<'_>),
    {
        let mut state = LoopState::new();
        self.detector
            .warm_up()
            .with_context(|| format!("warm up detector '{}'", self.detector.name()))?;

        let reason = loop {
            if let Some(reason) = state.should_stop(stop, self.frame_limit) {
                break reason;
            }
            let Some(mut frame) = self.source.next_frame().context("read next frame")? else {
                break StopReason::SourceExhausted;
            };
            self.transform.apply(&mut frame);
            state.frames += 1;

            match self.detector.detect_objects(&frame, self.min_confidence) {
                Ok(boxes) => {
                    let now = self.clock.now();
                    let decision = self.policy.evaluate(&frame, &boxes, now);
                    log::debug!(
                        "frame {} boxes={} suspicious={}",
                        frame.index,
                        boxes.len(),
                        decision.suspicious.len()
                    );
                    let alert_transition = self.indicator.observe(decision.suspicious.len());
                    if let Some(next) = alert_transition {
                        log::info!("alert indicator -> {:?}", next);
                    }

                    let mut status = Vec::new();
                    if let Some(message) = &decision.notify {
                        status.push(state.deliver(&mut self.notifier, message));
                    }
                    observer(&IntruderReport {
                        frame: &frame,
                        decision: &decision,
                        alert_state: self.indicator.state(),
                        alert_transition,
                        status,
                    });
                    state.log_health(&self.source, now);
                }
                Err(e) => {
                    state.skipped += 1;
                    log::warn!("detector failed on frame {}: {:#}", frame.index, e);
                }
            }

            if let Some(pacing) = self.pacing {
                if pacing.every > 0 && state.frames % pacing.every == 0 {
                    std::thread::sleep(pacing.pause);
                }
            }
        };

        log::info!(
            "intruder monitor stopped ({:?}) after {} frames, {} alerts sent",
            reason,
            state.frames,
            state.sent
        );
        Ok(state.summary(reason))
    }
}
