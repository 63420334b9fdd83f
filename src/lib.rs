//! Visitor Watch
//!
//! Camera monitors that classify frames and send rate-limited alerts.
//!
//! # Architecture
//!
//! Two monitors share one frame pipeline:
//!
//! 1. **Feeding monitor**: a whole-frame classifier flags feeding/petting
//!    visitors and sends a WebSocket alert at most once per cooldown.
//! 2. **Intruder monitor**: an object detector finds people, a white-pixel
//!    heuristic marks the suspicious ones, and an HTTP alert is posted at
//!    most once per cooldown. A web dashboard drives it.
//!
//! The **alert relay** fans both kinds of alert out to WebSocket clients.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (video files, V4L2 cameras, synthetic stubs)
//! - `detect`: classifier and object-detector backends
//! - `policy`: flagging thresholds, the white-percentage test, rate limiting
//! - `notify`: WebSocket and HTTP alert transports
//! - `pipeline`: the two monitor loops
//! - `dashboard`, `relay`: the HTTP surfaces

pub mod config;
pub mod dashboard;
pub mod detect;
pub mod frame;
pub mod http;
pub mod ingest;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod policy;
pub mod relay;
pub mod ui;

pub use config::MonitorConfig;
pub use detect::{BoundingBox, Category, Classification, DetectorBackend, LabelMap};
pub use frame::{Frame, FrameTransform};
pub use ingest::{open_source, FrameRate, FrameSource, SourceSpec};
pub use notify::Notifier;
pub use pipeline::{FeedingMonitor, IntruderMonitor, RunSummary, StopReason};
pub use policy::{
    ClassificationPolicy, Clock, IntrusionPolicy, ManualClock, MonotonicClock, RateLimiter,
};
