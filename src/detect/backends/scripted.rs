use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, Classification};
use crate::frame::Frame;

/// Backend that replays a fixed sequence of model outputs, one per frame.
///
/// Used by tests and by the binaries when no model backend is compiled in.
/// Once the script runs out, classification yields `None` and detection
/// yields no boxes.
pub struct ScriptedBackend {
    script: Script,
}

enum Script {
    Classifier(VecDeque<Option<Classification>>),
    Detector(VecDeque<Vec<BoundingBox>>),
}

/// On-disk script format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptFile {
    Classifications(Vec<Option<Classification>>),
    Detections(Vec<Vec<BoundingBox>>),
}

impl ScriptedBackend {
    pub fn classifier(steps: Vec<Option<Classification>>) -> Self {
        Self {
            script: Script::Classifier(steps.into()),
        }
    }

    pub fn detector(steps: Vec<Vec<BoundingBox>>) -> Self {
        Self {
            script: Script::Detector(steps.into()),
        }
    }

    /// Load a script from JSON, either
    /// `{"classifications": [{"label_index": 0, "confidence": 0.99}, null]}`
    /// or `{"detections": [[{"x_min": 0, "y_min": 0, "x_max": 10, "y_max": 10}], []]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detector script {}", path.display()))?;
        let file: ScriptFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detector script {}: {}", path.display(), e))?;
        Ok(match file {
            ScriptFile::Classifications(steps) => Self::classifier(steps),
            ScriptFile::Detections(steps) => Self::detector(steps),
        })
    }

    /// Steps left before the script runs dry.
    pub fn remaining(&self) -> usize {
        match &self.script {
            Script::Classifier(steps) => steps.len(),
            Script::Detector(steps) => steps.len(),
        }
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            (&self.script, capability),
            (Script::Classifier(_), DetectionCapability::Classification)
                | (Script::Detector(_), DetectionCapability::ObjectDetection)
        )
    }

    fn classify(&mut self, _frame: &Frame) -> Result<Option<Classification>> {
        match &mut self.script {
            Script::Classifier(steps) => Ok(steps.pop_front().flatten()),
            Script::Detector(_) => Err(anyhow!("scripted detector cannot classify")),
        }
    }

    fn detect_objects(&mut self, _frame: &Frame, min_confidence: f32) -> Result<Vec<BoundingBox>> {
        match &mut self.script {
            Script::Detector(steps) => {
                let mut boxes = steps.pop_front().unwrap_or_default();
                boxes.retain(|b| b.confidence >= min_confidence);
                Ok(boxes)
            }
            Script::Classifier(_) => Err(anyhow!("scripted classifier cannot detect objects")),
        }
    }
}
