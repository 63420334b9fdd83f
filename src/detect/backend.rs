use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Classification};
use crate::frame::Frame;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Whole-frame label with a confidence score.
    Classification,
    /// Bounding boxes for objects in the frame.
    ObjectDetection,
}

/// Detector backend trait.
///
/// Backends treat the frame as read-only and must not retain it past the call.
/// A backend implements the operation matching each capability it reports
/// from `supports`; the other operation keeps its default, which fails.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Classify a whole frame.
    ///
    /// `Ok(None)` means the model produced no usable score for this frame.
    fn classify(&mut self, _frame: &Frame) -> Result<Option<Classification>> {
        Err(anyhow!("backend '{}' does not support classification", self.name()))
    }

    /// Detect objects with at least `min_confidence`.
    fn detect_objects(&mut self, _frame: &Frame, _min_confidence: f32) -> Result<Vec<BoundingBox>> {
        Err(anyhow!(
            "backend '{}' does not support object detection",
            self.name()
        ))
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        (**self).supports(capability)
    }

    fn classify(&mut self, frame: &Frame) -> Result<Option<Classification>> {
        (**self).classify(frame)
    }

    fn detect_objects(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<BoundingBox>> {
        (**self).detect_objects(frame, min_confidence)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
