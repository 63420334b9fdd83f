#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{non_max_suppression, BoundingBox};
use crate::frame::Frame;

/// Tract-based object detector for YOLOv8-style ONNX exports.
///
/// The model takes a square `[1, 3, S, S]` input and emits `[1, 4 + C, N]`
/// rows of `cx, cy, w, h` followed by one score per class. Boxes are mapped
/// back to frame pixels and de-duplicated with NMS.
pub struct TractObjectDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractObjectDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            iou_threshold: 0.45,
            max_detections: 100,
        })
    }

    /// Override the NMS IoU threshold.
    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            self.input_size,
            self.input_size,
            imageops::FilterType::Triangle,
        );
        let side = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

/// Decode a `[channels, anchors]` row-major YOLO output.
///
/// `scale_x`/`scale_y` map model-input pixels to frame pixels.
pub(crate) fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    min_confidence: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<BoundingBox>> {
    if channels < 5 {
        return Err(anyhow!("detector output has {} channels, need at least 5", channels));
    }
    if data.len() != channels * anchors {
        return Err(anyhow!(
            "detector output has {} values, expected {}x{}",
            data.len(),
            channels,
            anchors
        ));
    }
    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];

    let mut boxes = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (4..channels)
            .map(|channel| (channel - 4, at(channel, anchor)))
            .filter(|(_, score)| score.is_finite())
            .fold((0, f32::NEG_INFINITY), |best, current| {
                if current.1 > best.1 {
                    current
                } else {
                    best
                }
            });
        if confidence < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        boxes.push(BoundingBox {
            x_min: (cx - w / 2.0) * scale_x,
            y_min: (cy - h / 2.0) * scale_y,
            x_max: (cx + w / 2.0) * scale_x,
            y_max: (cy + h / 2.0) * scale_y,
            confidence,
            class_id,
        });
    }
    Ok(boxes)
}

impl DetectorBackend for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract-yolo"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect_objects(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let (channels, anchors) = match shape.as_slice() {
            [1, channels, anchors] => (*channels, *anchors),
            other => return Err(anyhow!("unexpected detector output shape {:?}", other)),
        };
        let data: Vec<f32> = view.iter().copied().collect();

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let boxes = decode_predictions(&data, channels, anchors, min_confidence, scale_x, scale_y)?;

        let mut kept = non_max_suppression(boxes, self.iou_threshold);
        kept.truncate(self.max_detections);
        Ok(kept)
    }
}
