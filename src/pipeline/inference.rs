//! Inference stage: the worker thread behind the input slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};

use crate::annotate::annotate;
use crate::config::PipelineConfig;
use crate::detect::{DetectionResult, DetectorBackend};
use crate::encode::FrameEncoder;
use crate::error::InferenceError;
use crate::frame::{Frame, OutputOrigin, PixelLayout, RenderedOutput};

use super::slot::{Offer, SlotReceiver, SlotSender};
use super::stats::StatsRecorder;
use super::SharedConfig;

/// What the stage hands to the reconciler for one inferred frame.
#[derive(Clone, Debug)]
pub struct InferenceOutput {
    pub result: DetectionResult,
    pub output: RenderedOutput,
}

pub struct InferenceStage {
    detector: Box<dyn DetectorBackend>,
    encoder: Arc<dyn FrameEncoder>,
    stats: StatsRecorder,
}

impl InferenceStage {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        encoder: Arc<dyn FrameEncoder>,
        stats: StatsRecorder,
    ) -> Self {
        Self {
            detector,
            encoder,
            stats,
        }
    }

    /// Run the detector's warm-up hook on a blank frame.
    pub fn warm_up(&mut self, config: &PipelineConfig) -> Result<()> {
        let blank = Frame::blank(config.resolution, PixelLayout::Bgr8);
        let started = Instant::now();
        self.detector
            .warm_up(&blank)
            .with_context(|| format!("warm-up of detector `{}` failed", self.detector.name()))?;
        log::info!(
            "InferenceStage: detector `{}` warmed up in {:?}",
            self.detector.name(),
            started.elapsed()
        );
        Ok(())
    }

    /// Detect, annotate and encode one frame. Failures are logged and
    /// counted; they yield no output.
    pub fn process(&mut self, frame: &Frame, config: &PipelineConfig) -> Option<InferenceOutput> {
        let started = Instant::now();
        let detections = match self.detector.detect(frame, config.confidence) {
            Ok(detections) => detections,
            Err(err) => {
                let err = InferenceError {
                    backend: self.detector.name(),
                    frame: frame.id,
                    message: format!("{:#}", err),
                };
                log::error!("{}", err);
                self.stats.record_inference_failure();
                return None;
            }
        };
        self.stats.record_inference(started.elapsed());

        let detections = detections
            .into_iter()
            .filter(|d| d.confidence >= config.confidence)
            .collect();
        let result = DetectionResult::new(frame.id, detections, &config.danger_labels);

        let now = SystemTime::now();
        for detection in result.dangerous(&config.danger_labels) {
            log::warn!(
                "danger detected on frame {}: {} ({:.2})",
                frame.id,
                detection.label,
                detection.confidence
            );
            self.stats.record_danger(&detection.label, now);
        }

        let encoded = if result.detections.is_empty() {
            self.encoder.encode(frame, config.jpeg_quality)
        } else {
            annotate(frame, &result.detections, &config.danger_labels)
                .and_then(|annotated| self.encoder.encode(&annotated, config.jpeg_quality))
        };
        match encoded {
            Ok(jpeg) => {
                let output =
                    RenderedOutput::new(jpeg, frame.id, result.danger, OutputOrigin::Inferred);
                Some(InferenceOutput { result, output })
            }
            Err(err) => {
                log::error!("InferenceStage: encoding frame {} failed: {}", frame.id, err);
                self.stats.record_encode_failure();
                None
            }
        }
    }

    /// Worker loop. Waits on the input slot with the configured timeout so a
    /// cleared running flag is noticed promptly.
    fn run(
        mut self,
        input: SlotReceiver<Frame>,
        output: SlotSender<InferenceOutput>,
        config: SharedConfig,
        running: Arc<AtomicBool>,
    ) {
        log::info!("InferenceStage: worker started ({})", self.detector.name());
        while running.load(Ordering::SeqCst) {
            let current = config.current();
            let frame = match input.recv_timeout(current.inference_wait) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(_) => {
                    log::debug!("InferenceStage: input slot closed");
                    break;
                }
            };
            let Some(result) = self.process(&frame, &current) else {
                continue;
            };
            if output.offer(result) == Offer::Closed {
                log::debug!("InferenceStage: output slot closed");
                break;
            }
        }
        log::info!("InferenceStage: worker stopped");
    }

    pub(crate) fn spawn(
        self,
        input: SlotReceiver<Frame>,
        output: SlotSender<InferenceOutput>,
        config: SharedConfig,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || self.run(input, output, config, running))
            .context("failed to spawn inference worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::encode::JpegEncoder;
    use crate::frame::{FrameId, FrameSize, PixelLayout};

    struct FixedDetector(Vec<Detection>);

    impl DetectorBackend for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl DetectorBackend for BrokenDetector {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn detect(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
            Err(anyhow::anyhow!("model crashed"))
        }
    }

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: 1.0,
                y1: 1.0,
                x2: 10.0,
                y2: 10.0,
            },
        }
    }

    fn frame() -> Frame {
        let mut frame = Frame::blank(FrameSize::new(16, 16), PixelLayout::Bgr8);
        frame.id = FrameId::new(1, 30);
        frame
    }

    #[test]
    fn danger_detection_is_flagged_and_counted() {
        let stats = StatsRecorder::new();
        let mut stage = InferenceStage::new(
            Box::new(FixedDetector(vec![detection("smoke", 0.6), detection("person", 0.9)])),
            Arc::new(JpegEncoder),
            stats.clone(),
        );
        let out = stage.process(&frame(), &PipelineConfig::default()).unwrap();

        assert!(out.result.danger);
        assert!(out.output.danger);
        assert_eq!(out.output.frame, FrameId::new(1, 30));
        assert_eq!(out.output.origin, OutputOrigin::Inferred);
        let counters = stats.counters();
        assert_eq!(counters.detected_smoke, 1);
        assert_eq!(counters.inferred_frames, 1);
        assert!(counters.last_detection_time.is_some());
    }

    #[test]
    fn detections_below_threshold_are_dropped() {
        let mut stage = InferenceStage::new(
            Box::new(FixedDetector(vec![detection("fire", 0.05)])),
            Arc::new(JpegEncoder),
            StatsRecorder::new(),
        );
        let out = stage.process(&frame(), &PipelineConfig::default()).unwrap();
        assert!(out.result.detections.is_empty());
        assert!(!out.output.danger);
    }

    #[test]
    fn detector_failure_yields_no_output() {
        let stats = StatsRecorder::new();
        let mut stage = InferenceStage::new(
            Box::new(BrokenDetector),
            Arc::new(JpegEncoder),
            stats.clone(),
        );
        assert!(stage.process(&frame(), &PipelineConfig::default()).is_none());
        assert_eq!(stats.counters().inference_failures, 1);
    }
}
