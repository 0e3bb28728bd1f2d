//! Frame and output types shared by every pipeline stage.
//!
//! - `Frame`: decoded pixels stamped with a `FrameId` at capture time.
//! - `RenderedOutput`: compressed bytes the pipeline emits downstream.
//!
//! A `Frame` is owned by exactly one stage at a time. The primary loop clones
//! the frame it hands to the inference worker, so the capture path never
//! shares a buffer with inference.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Position of a frame in the capture history.
///
/// `session` is bumped on every successful open of the capture device and
/// `seq` restarts at zero with it, so ordering by `(session, seq)` stays
/// monotonic across reconnects and source switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FrameId {
    pub session: u64,
    pub seq: u64,
}

impl FrameId {
    pub fn new(session: u64, seq: u64) -> Self {
        Self { session, seq }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.seq)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PixelLayout {
    /// Interleaved blue, green, red. What most webcams hand back.
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr8 | PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded camera frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub id: FrameId,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout, id: FrameId) -> Self {
        Self {
            data,
            width,
            height,
            layout,
            id,
            captured_at: Instant::now(),
        }
    }

    /// All-black frame, used to warm detectors up before the first capture.
    pub fn blank(size: FrameSize, layout: PixelLayout) -> Self {
        let len = size.width as usize * size.height as usize * layout.channels();
        Self::new(
            vec![0u8; len],
            size.width,
            size.height,
            layout,
            FrameId::default(),
        )
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Number of bytes the dimensions and layout call for.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels()
    }

    pub fn seq(&self) -> u64 {
        self.id.seq
    }
}

// ----------------------------------------------------------------------------
// RenderedOutput
// ----------------------------------------------------------------------------

/// Where an emitted output came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OutputOrigin {
    /// Fresh annotated frame from the inference worker.
    Inferred,
    /// Re-emission of the last annotated frame.
    Cached,
    /// Unannotated capture, encoded because no annotated frame exists yet.
    Raw,
}

/// Compressed image ready for the streaming consumer. Immutable once built;
/// the payload is shared so re-emitting a cached output does not copy it.
#[derive(Clone, Debug)]
pub struct RenderedOutput {
    jpeg: Arc<[u8]>,
    pub frame: FrameId,
    pub danger: bool,
    pub origin: OutputOrigin,
}

impl RenderedOutput {
    pub fn new(jpeg: Vec<u8>, frame: FrameId, danger: bool, origin: OutputOrigin) -> Self {
        Self {
            jpeg: jpeg.into(),
            frame,
            danger,
            origin,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }

    /// Same payload, re-labelled as a cached re-emission. Danger is an event
    /// signal and is only raised on the tick that delivers a fresh result.
    pub fn as_cached(&self) -> Self {
        Self {
            jpeg: Arc::clone(&self.jpeg),
            frame: self.frame,
            danger: false,
            origin: OutputOrigin::Cached,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ids_order_by_session_then_seq() {
        let late_old_session = FrameId::new(1, 500);
        let early_new_session = FrameId::new(2, 0);
        assert!(early_new_session > late_old_session);
        assert!(FrameId::new(2, 3) > FrameId::new(2, 2));
    }

    #[test]
    fn blank_frame_has_expected_length() {
        let frame = Frame::blank(FrameSize::new(4, 3), PixelLayout::Bgr8);
        assert_eq!(frame.pixels().len(), 36);
        assert_eq!(frame.expected_len(), 36);
    }

    #[test]
    fn cached_output_shares_payload_and_clears_danger() {
        let out = RenderedOutput::new(
            vec![1, 2, 3],
            FrameId::new(0, 7),
            true,
            OutputOrigin::Inferred,
        );
        let cached = out.as_cached();
        assert_eq!(cached.bytes(), out.bytes());
        assert_eq!(cached.frame, out.frame);
        assert!(!cached.danger);
        assert_eq!(cached.origin, OutputOrigin::Cached);
    }
}
