//! Result reconciler: picks what the primary loop emits on each tick.
//!
//! Per tick, in order of preference:
//! 1. the newest inference output, if it is not older than the last one
//!    emitted; it becomes the cached last-good output
//! 2. the cached last-good output, re-labelled as a cached re-emission
//! 3. the current raw frame, encoded without annotation, `danger = false`

use crate::detect::DetectionResult;
use crate::encode::FrameEncoder;
use crate::error::EncodeError;
use crate::frame::{Frame, FrameId, OutputOrigin, RenderedOutput};

use super::inference::InferenceOutput;

#[derive(Default)]
pub struct ResultReconciler {
    /// Frame of the newest inference output emitted so far, or the floor set
    /// by the last source switch.
    last_emitted: Option<FrameId>,
    cached: Option<RenderedOutput>,
    latest_result: Option<DetectionResult>,
}

impl ResultReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached output and refuse results captured before `floor`.
    /// Used on an explicit source switch; reconnects keep the cache.
    pub fn reset(&mut self, floor: FrameId) {
        self.cached = None;
        self.latest_result = None;
        self.last_emitted = Some(self.last_emitted.map_or(floor, |last| last.max(floor)));
    }

    /// Decide this tick's output. `Ok(None)` when there is neither a result,
    /// a cached output nor a current frame.
    pub fn tick(
        &mut self,
        newest: Option<InferenceOutput>,
        frame: Option<&Frame>,
        encoder: &dyn FrameEncoder,
        quality: u8,
    ) -> Result<Option<RenderedOutput>, EncodeError> {
        if let Some(InferenceOutput { result, output }) = newest {
            if self.last_emitted.map_or(true, |last| output.frame >= last) {
                self.last_emitted = Some(output.frame);
                self.cached = Some(output.clone());
                self.latest_result = Some(result);
                return Ok(Some(output));
            }
            log::debug!(
                "ResultReconciler: discarding stale result for frame {} (last emitted {:?})",
                output.frame,
                self.last_emitted
            );
        }

        if let Some(cached) = &self.cached {
            return Ok(Some(cached.as_cached()));
        }

        match frame {
            Some(frame) => {
                let jpeg = encoder.encode(frame, quality)?;
                Ok(Some(RenderedOutput::new(
                    jpeg,
                    frame.id,
                    false,
                    OutputOrigin::Raw,
                )))
            }
            None => Ok(None),
        }
    }

    pub fn latest_result(&self) -> Option<&DetectionResult> {
        self.latest_result.as_ref()
    }

    pub fn has_cached(&self) -> bool {
        self.cached.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DangerLabels;
    use crate::frame::{FrameSize, PixelLayout};

    struct TagEncoder;

    impl FrameEncoder for TagEncoder {
        fn encode(&self, frame: &Frame, _quality: u8) -> Result<Vec<u8>, EncodeError> {
            Ok(vec![frame.id.seq as u8])
        }
    }

    struct FailingEncoder;

    impl FrameEncoder for FailingEncoder {
        fn encode(&self, frame: &Frame, _quality: u8) -> Result<Vec<u8>, EncodeError> {
            Err(EncodeError::BadBuffer {
                len: 0,
                width: frame.width,
                height: frame.height,
                layout: frame.layout,
            })
        }
    }

    fn inferred(session: u64, seq: u64, danger: bool) -> InferenceOutput {
        let id = FrameId::new(session, seq);
        InferenceOutput {
            result: DetectionResult::new(id, Vec::new(), &DangerLabels::default()),
            output: RenderedOutput::new(vec![0xAA], id, danger, OutputOrigin::Inferred),
        }
    }

    fn frame(session: u64, seq: u64) -> Frame {
        let mut frame = Frame::blank(FrameSize::new(2, 2), PixelLayout::Bgr8);
        frame.id = FrameId::new(session, seq);
        frame
    }

    #[test]
    fn never_emits_a_result_older_than_one_emitted() {
        let mut reconciler = ResultReconciler::new();
        let arrivals = [3u64, 9, 6, 12, 12, 1, 15];
        let mut emitted_results = Vec::new();

        for (tick, seq) in arrivals.into_iter().enumerate() {
            let out = reconciler
                .tick(
                    Some(inferred(1, seq, false)),
                    Some(&frame(1, 20 + tick as u64)),
                    &TagEncoder,
                    80,
                )
                .unwrap()
                .unwrap();
            assert_ne!(out.origin, OutputOrigin::Raw);
            emitted_results.push(out.frame);
        }

        assert!(emitted_results.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(emitted_results.last(), Some(&FrameId::new(1, 15)));
    }

    #[test]
    fn falls_back_to_cache_then_raw() {
        let mut reconciler = ResultReconciler::new();

        let raw = reconciler
            .tick(None, Some(&frame(1, 0)), &TagEncoder, 80)
            .unwrap()
            .unwrap();
        assert_eq!(raw.origin, OutputOrigin::Raw);
        assert!(!raw.danger);
        assert_eq!(raw.bytes(), &[0]);

        let fresh = reconciler
            .tick(Some(inferred(1, 0, true)), Some(&frame(1, 1)), &TagEncoder, 80)
            .unwrap()
            .unwrap();
        assert!(fresh.danger);
        assert_eq!(fresh.origin, OutputOrigin::Inferred);

        let cached = reconciler
            .tick(None, Some(&frame(1, 2)), &TagEncoder, 80)
            .unwrap()
            .unwrap();
        assert_eq!(cached.origin, OutputOrigin::Cached);
        assert_eq!(cached.frame, FrameId::new(1, 0));
        assert!(!cached.danger);
    }

    #[test]
    fn nothing_to_emit_without_frame_or_cache() {
        let mut reconciler = ResultReconciler::new();
        assert!(reconciler.tick(None, None, &TagEncoder, 80).unwrap().is_none());
    }

    #[test]
    fn reset_clears_cache_and_rejects_results_from_before_switch() {
        let mut reconciler = ResultReconciler::new();
        reconciler
            .tick(Some(inferred(1, 4, false)), None, &TagEncoder, 80)
            .unwrap();
        assert!(reconciler.has_cached());

        reconciler.reset(FrameId::new(2, 0));
        assert!(!reconciler.has_cached());
        assert!(reconciler.latest_result().is_none());

        let out = reconciler
            .tick(Some(inferred(1, 7, true)), Some(&frame(2, 0)), &TagEncoder, 80)
            .unwrap()
            .unwrap();
        assert_eq!(out.origin, OutputOrigin::Raw);
        assert_eq!(out.frame, FrameId::new(2, 0));

        let out = reconciler
            .tick(Some(inferred(2, 0, false)), Some(&frame(2, 1)), &TagEncoder, 80)
            .unwrap()
            .unwrap();
        assert_eq!(out.origin, OutputOrigin::Inferred);
    }

    #[test]
    fn encoder_failure_on_raw_path_is_reported() {
        let mut reconciler = ResultReconciler::new();
        assert!(reconciler
            .tick(None, Some(&frame(1, 0)), &FailingEncoder, 80)
            .is_err());
    }
}
