use serde::{Deserialize, Serialize};

/// Top-1 output of an image classifier for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Index into the label file (line number, zero-based).
    pub label_index: usize,
    /// Score of the winning label, nominally 0.0..=1.0.
    pub confidence: f32,
}

/// One object detector box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub class_id: usize,
}

fn default_confidence() -> f32 {
    1.0
}

/// Integer pixel rectangle, half-open: `x_min..x_max`, `y_min..y_max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            confidence: 1.0,
            class_id: 0,
        }
    }

    /// Truncate to integer pixels and clip to a `width`x`height` frame.
    ///
    /// Returns `None` when the clipped box has no area or any coordinate is
    /// not finite.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let coords = [self.x_min, self.y_min, self.x_max, self.y_max];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }
        let clamp = |value: f32, limit: u32| -> u32 { value.max(0.0).min(limit as f32) as u32 };
        let rect = PixelRect {
            x_min: clamp(self.x_min, width),
            y_min: clamp(self.y_min, height),
            x_max: clamp(self.x_max, width),
            y_max: clamp(self.y_max, height),
        };
        if rect.x_max <= rect.x_min || rect.y_max <= rect.y_min {
            return None;
        }
        Some(rect)
    }

    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Greedy non-maximum suppression, per class, highest confidence first.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_truncates_and_bounds() {
        let rect = BoundingBox::new(-5.0, 10.7, 700.2, 200.9)
            .clip_to(640, 480)
            .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x_min: 0,
                y_min: 10,
                x_max: 640,
                y_max: 200
            }
        );
        assert_eq!(rect.area(), 640 * 190);
    }

    #[test]
    fn clip_rejects_degenerate_and_nan_boxes() {
        assert!(BoundingBox::new(10.0, 10.0, 10.5, 40.0).clip_to(640, 480).is_none());
        assert!(BoundingBox::new(f32::NAN, 0.0, 5.0, 5.0).clip_to(640, 480).is_none());
        assert!(BoundingBox::new(700.0, 0.0, 800.0, 5.0).clip_to(640, 480).is_none());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_pair() {
        let mut best = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        best.confidence = 0.9;
        let mut overlap = BoundingBox::new(1.0, 1.0, 11.0, 11.0);
        overlap.confidence = 0.8;
        let mut other_class = overlap;
        other_class.class_id = 3;
        let far = BoundingBox::new(50.0, 50.0, 60.0, 60.0);

        let kept = non_max_suppression(vec![overlap, far, best, other_class], 0.45);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], far);
        assert!(kept.contains(&best));
        assert!(kept.contains(&other_class));
        assert!(!kept.iter().any(|b| b.class_id == 0 && b.confidence == 0.8));
    }
}
