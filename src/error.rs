//! Error taxonomy for the capture / inference pipeline.
//!
//! None of these errors terminate the pipeline. Each one is logged at the point
//! it is handled and the pipeline keeps streaming with whatever it has.

use thiserror::Error;

use crate::ingest::{CaptureBackend, SourceId};

/// The device could not be acquired by any open strategy.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("camera source {source_id} unavailable (tried {tried:?})")]
    Unavailable {
        source_id: SourceId,
        tried: Vec<CaptureBackend>,
    },
}

/// Transient read failure. Accumulated by the reconnect supervisor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("no capture handle is open")]
    NotOpen,
    #[error("capture device returned no frame: {0}")]
    ReadFailed(String),
}

/// The detection capability failed for one frame.
#[derive(Debug, Error)]
#[error("detector `{backend}` failed on frame {frame}: {message}")]
pub struct InferenceError {
    pub backend: &'static str,
    pub frame: crate::frame::FrameId,
    pub message: String,
}

/// The compression capability failed. The tick that hit it emits nothing.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame buffer of {len} bytes does not match {width}x{height} {layout:?}")]
    BadBuffer {
        len: usize,
        width: u32,
        height: u32,
        layout: crate::frame::PixelLayout,
    },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}
