#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::ingest::{normalize_to_rgb, SourceFormat};

const NMS_IOU: f32 = 0.45;
/// Value of the padding around a letterboxed frame.
const PAD_VALUE: f32 = 144.0 / 255.0;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a `[1, 3, S, S]` float input and a `[1, 4 + classes, anchors]`
/// output of centre/size boxes followed by per-class scores. Frames are
/// letterboxed: scaled by one ratio into the top-left of the model input,
/// padded with grey, and boxes divided by the same ratio on the way back.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be positive"));
        }
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

        log::info!(
            "TractBackend: loaded {} ({}x{}, {} labels)",
            model_path.display(),
            input_size,
            input_size,
            labels.len()
        );
        Ok(Self {
            model,
            input_size,
            labels,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let rgb = normalize_to_rgb(
            frame.pixels(),
            frame.width,
            frame.height,
            SourceFormat::from(frame.layout),
        )?;
        let image = RgbImage::from_raw(frame.width, frame.height, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}", frame.size()))?;
        let ratio = letterbox_ratio(frame.width, frame.height, self.input_size);
        let scaled_w = ((frame.width as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let scaled_h = ((frame.height as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let resized = imageops::resize(&image, scaled_w, scaled_h, FilterType::Triangle);

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let (x, y) = (x as u32, y as u32);
            if x < scaled_w && y < scaled_h {
                resized.get_pixel(x, y)[c] as f32 / 255.0
            } else {
                PAD_VALUE
            }
        });
        Ok(input.into_tensor())
    }

    fn label_for(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class))
    }

    fn decode(&self, output: &Tensor, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;
        let (channels, anchors) = (view.shape()[1], view.shape()[2]);
        if channels <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }

        let ratio = letterbox_ratio(frame.width, frame.height, self.input_size);
        let mut candidates: Vec<(usize, Detection)> = Vec::new();
        for a in 0..anchors {
            let (class, score) = (4..channels)
                .map(|c| (c - 4, view[[0, c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            candidates.push((
                class,
                Detection {
                    label: self.label_for(class),
                    confidence: score,
                    bbox: BoundingBox {
                        x1: ((cx - w / 2.0) / ratio).max(0.0),
                        y1: ((cy - h / 2.0) / ratio).max(0.0),
                        x2: ((cx + w / 2.0) / ratio).min(frame.width as f32),
                        y2: ((cy + h / 2.0) / ratio).min(frame.height as f32),
                    },
                },
            ));
        }

        candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
        let mut kept: Vec<(usize, Detection)> = Vec::new();
        for (class, det) in candidates {
            let overlaps = kept
                .iter()
                .any(|(k_class, k)| *k_class == class && k.bbox.iou(&det.bbox) > NMS_IOU);
            if !overlaps {
                kept.push((class, det));
            }
        }
        Ok(kept.into_iter().map(|(_, det)| det).collect())
    }
}

/// Scale that fits a `width`x`height` frame inside a `side`x`side` input
/// without distortion.
fn letterbox_ratio(width: u32, height: u32, side: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    (side as f32 / width as f32).min(side as f32 / height as f32)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame, confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_keeps_aspect_ratio() {
        // 1280x720 into 640: limited by width
        assert!((letterbox_ratio(1280, 720, 640) - 0.5).abs() < 1e-6);
        // 480x960 into 640: limited by height
        assert!((letterbox_ratio(480, 960, 640) - 2.0 / 3.0).abs() < 1e-6);
        assert!((letterbox_ratio(320, 320, 640) - 2.0).abs() < 1e-6);
        assert_eq!(letterbox_ratio(0, 720, 640), 1.0);
    }
}
