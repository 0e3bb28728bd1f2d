//! Compression capability.

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::RgbImage;

use crate::error::EncodeError;
use crate::frame::Frame;
use crate::ingest::{normalize_to_rgb, SourceFormat};

/// Turns a frame into compressed bytes.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError>;
}

/// Baseline JPEG via the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegEncoder;

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
        let rgb = to_rgb_image(frame)?;
        let mut buffer = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
        Ok(buffer)
    }
}

/// Packed RGB copy of a frame.
pub(crate) fn to_rgb_image(frame: &Frame) -> Result<RgbImage, EncodeError> {
    let bad_buffer = || EncodeError::BadBuffer {
        len: frame.pixels().len(),
        width: frame.width,
        height: frame.height,
        layout: frame.layout,
    };
    let rgb = normalize_to_rgb(
        frame.pixels(),
        frame.width,
        frame.height,
        SourceFormat::from(frame.layout),
    )
    .map_err(|_| bad_buffer())?;
    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(bad_buffer)
}
