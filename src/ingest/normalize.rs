use anyhow::{anyhow, Result};

use crate::frame::PixelLayout;

/// Byte layouts that can be normalised to packed RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SourceFormat {
    Rgb24,
    Bgr24,
    Gray8,
    #[cfg(feature = "ingest-v4l2")]
    Yuyv,
    #[cfg(feature = "ingest-v4l2")]
    Nv12,
}

impl From<PixelLayout> for SourceFormat {
    fn from(layout: PixelLayout) -> Self {
        match layout {
            PixelLayout::Rgb8 => SourceFormat::Rgb24,
            PixelLayout::Bgr8 => SourceFormat::Bgr24,
            PixelLayout::Gray8 => SourceFormat::Gray8,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: SourceFormat,
) -> Result<Vec<u8>> {
    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        SourceFormat::Rgb24 => {
            expect_len(pixels, plane * 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        SourceFormat::Bgr24 => {
            expect_len(pixels, plane * 3, "BGR")?;
            let mut rgb = Vec::with_capacity(pixels.len());
            for px in pixels.chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Ok(rgb)
        }
        SourceFormat::Gray8 => {
            expect_len(pixels, plane, "gray")?;
            Ok(pixels.iter().flat_map(|&p| [p, p, p]).collect())
        }
        #[cfg(feature = "ingest-v4l2")]
        SourceFormat::Yuyv => yuyv_to_rgb(pixels, plane),
        #[cfg(feature = "ingest-v4l2")]
        SourceFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

fn expect_len(pixels: &[u8], expected: usize, what: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            what,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

#[cfg(feature = "ingest-v4l2")]
fn yuyv_to_rgb(pixels: &[u8], plane: usize) -> Result<Vec<u8>> {
    expect_len(pixels, plane * 2, "YUYV")?;
    let mut rgb = Vec::with_capacity(plane * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

#[cfg(feature = "ingest-v4l2")]
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    expect_len(pixels, y_plane + y_plane / 2, "NV12")?;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok(rgb)
}

#[cfg(feature = "ingest-v4l2")]
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

#[cfg(feature = "ingest-v4l2")]
fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
