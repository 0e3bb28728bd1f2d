use anyhow::Result;

use super::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The pipeline calls a backend from exactly one worker thread, so `Send` is
/// all that is required. Calls are synchronous and cannot be cancelled once
/// started.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, keeping detections scoring at least
    /// `confidence_threshold`.
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Warm-up hook, run once on a blank frame before streaming starts.
    fn warm_up(&mut self, frame: &Frame) -> Result<()> {
        self.detect(frame, 1.0).map(|_| ())
    }
}
