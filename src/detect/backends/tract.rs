#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops;
use tract_onnx::prelude::*;

use super::TensorLayout;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Classification;
use crate::frame::Frame;

/// Tract-based image classifier for ONNX models.
///
/// Frames are resized to the model input, scaled to `0..=1` and run through
/// the model; the arg-max of the first output is the classification.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    layout: TensorLayout,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        layout: TensorLayout,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (w, h) = (width as usize, height as usize);
        let shape = match layout {
            TensorLayout::Nchw => tvec!(1, 3, h, w),
            TensorLayout::Nhwc => tvec!(1, h, w, 3),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            layout,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        );
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, channel, y, x)| {
                    resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
                })
                .into_tensor()
            }
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, channel)| {
                    resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
                })
                .into_tensor()
            }
        }
    }
}

/// Arg-max over a score vector; `None` for empty or non-finite winners.
pub(crate) fn top_score(scores: impl IntoIterator<Item = f32>) -> Option<Classification> {
    let mut best: Option<Classification> = None;
    for (label_index, confidence) in scores.into_iter().enumerate() {
        if confidence.is_nan() {
            continue;
        }
        if best.map_or(true, |b| confidence > b.confidence) {
            best = Some(Classification {
                label_index,
                confidence,
            });
        }
    }
    best.filter(|b| b.confidence.is_finite())
}

impl DetectorBackend for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Classification)
    }

    fn classify(&mut self, frame: &Frame) -> Result<Option<Classification>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(top_score(scores.iter().copied()))
    }
}
