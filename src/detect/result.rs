use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::frame::FrameId;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Labels that raise the danger flag. Matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DangerLabels(BTreeSet<String>);

impl DangerLabels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            labels
                .into_iter()
                .map(|l| l.as_ref().trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(&label.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for DangerLabels {
    fn default() -> Self {
        Self::new(["fire", "smoke"])
    }
}

/// Outcome of inference on one frame. Immutable once built.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub frame: FrameId,
    pub detections: Vec<Detection>,
    pub danger: bool,
}

impl DetectionResult {
    pub fn new(frame: FrameId, detections: Vec<Detection>, danger_labels: &DangerLabels) -> Self {
        let danger = detections.iter().any(|d| danger_labels.contains(&d.label));
        Self {
            frame,
            detections,
            danger,
        }
    }

    /// Detections whose label is in the danger set.
    pub fn dangerous<'a>(
        &'a self,
        danger_labels: &'a DangerLabels,
    ) -> impl Iterator<Item = &'a Detection> + 'a {
        self.detections
            .iter()
            .filter(move |d| danger_labels.contains(&d.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            },
        }
    }

    #[test]
    fn danger_only_for_configured_labels() {
        let labels = DangerLabels::default();
        let frame = FrameId::new(1, 0);
        assert!(!DetectionResult::new(frame, vec![det("person")], &labels).danger);
        assert!(DetectionResult::new(frame, vec![det("person"), det("Smoke")], &labels).danger);
        assert!(!DetectionResult::new(frame, vec![], &labels).danger);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = det("fire").bbox;
        let b = BoundingBox {
            x1: 20.0,
            y1: 20.0,
            x2: 30.0,
            y2: 30.0,
        };
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
