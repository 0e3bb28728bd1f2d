//! Synthetic capture driver.
//!
//! Produces BGR frames with a drifting background and, optionally, a periodic
//! flame-coloured blob so the CPU detector has something to find. Used for
//! demos (`stub://` sources) and tests; it never touches hardware.

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{CaptureBackend, CaptureDriver, CaptureHandle, CaptureProperty, CapturedImage, SourceId};
use crate::frame::PixelLayout;

/// Configuration for the synthetic driver.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Sources that open successfully. Everything else fails to open.
    pub available: Vec<SourceId>,
    /// Frame size used until a resolution property is applied.
    pub width: u32,
    pub height: u32,
    /// Every `hazard_period` frames a flame blob appears for `hazard_frames`
    /// frames. Zero disables the blob.
    pub hazard_period: u64,
    pub hazard_frames: u64,
    /// Per-pixel noise amplitude.
    pub noise: u8,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            available: vec![SourceId::Index(0), SourceId::Uri("stub://camera".to_string())],
            width: 640,
            height: 480,
            hazard_period: 150,
            hazard_frames: 30,
            noise: 4,
        }
    }
}

impl SyntheticConfig {
    fn accepts(&self, source: &SourceId) -> bool {
        match source {
            SourceId::Uri(uri) if uri.starts_with("stub://") => true,
            other => self.available.contains(other),
        }
    }
}

pub struct SyntheticDriver {
    config: SyntheticConfig,
}

impl SyntheticDriver {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl Default for SyntheticDriver {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl CaptureDriver for SyntheticDriver {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(
        &mut self,
        source: &SourceId,
        backend: CaptureBackend,
    ) -> Result<Box<dyn CaptureHandle>> {
        if !self.config.accepts(source) {
            return Err(anyhow!("synthetic source {} does not exist", source));
        }
        log::info!("SyntheticDriver: opened {} via {:?}", source, backend);
        Ok(Box::new(SyntheticHandle {
            config: self.config.clone(),
            width: self.config.width,
            height: self.config.height,
            frame_count: 0,
            open: true,
        }))
    }
}

struct SyntheticHandle {
    config: SyntheticConfig,
    width: u32,
    height: u32,
    frame_count: u64,
    open: bool,
}

impl SyntheticHandle {
    fn hazard_visible(&self) -> bool {
        let period = self.config.hazard_period;
        period > 0 && self.frame_count % period >= period - self.config.hazard_frames.min(period)
    }

    /// Drifting gradient background, plus the flame blob when it is due.
    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rng = rand::thread_rng();
        let drift = (self.frame_count % 256) as usize;
        let mut pixels = vec![0u8; w * h * 3];

        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                let base = ((x + y + drift) % 160) as u8 + 40;
                let jitter = if self.config.noise > 0 {
                    rng.gen_range(0..=self.config.noise)
                } else {
                    0
                };
                let v = base.saturating_add(jitter);
                pixels[offset..offset + 3].copy_from_slice(&[v, v, v]);
            }
        }

        if self.hazard_visible() {
            let (bw, bh) = (w / 4, h / 4);
            let (x0, y0) = (w / 2 - bw / 2, h / 2 - bh / 2);
            for y in y0..y0 + bh {
                for x in x0..x0 + bw {
                    let offset = (y * w + x) * 3;
                    // BGR flame orange
                    pixels[offset..offset + 3].copy_from_slice(&[30, 140, 250]);
                }
            }
        }

        pixels
    }
}

impl CaptureHandle for SyntheticHandle {
    fn is_opened(&self) -> bool {
        self.open
    }

    fn set_property(&mut self, property: CaptureProperty) -> Result<()> {
        match property {
            CaptureProperty::FrameWidth(width) if width > 0 => self.width = width,
            CaptureProperty::FrameHeight(height) if height > 0 => self.height = height,
            CaptureProperty::FrameWidth(_) | CaptureProperty::FrameHeight(_) => {
                return Err(anyhow!("synthetic frames need a non-zero size"))
            }
            CaptureProperty::BufferSize(_) | CaptureProperty::Fps(_) => {}
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<CapturedImage>> {
        if !self.open {
            return Ok(None);
        }
        let data = self.render();
        self.frame_count += 1;
        Ok(Some(CapturedImage {
            data,
            width: self.width,
            height: self.height,
            layout: PixelLayout::Bgr8,
        }))
    }

    fn release(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut driver = SyntheticDriver::default();
        let mut handle = driver.open(&SourceId::Index(0), CaptureBackend::Any)?;
        handle.set_property(CaptureProperty::FrameWidth(32))?;
        handle.set_property(CaptureProperty::FrameHeight(16))?;

        let image = handle.read()?.expect("frame");
        assert_eq!((image.width, image.height), (32, 16));
        assert_eq!(image.data.len(), 32 * 16 * 3);
        Ok(())
    }

    #[test]
    fn unknown_sources_fail_to_open() {
        let mut driver = SyntheticDriver::default();
        assert!(driver.open(&SourceId::Index(7), CaptureBackend::Any).is_err());
        assert!(driver
            .open(&SourceId::Uri("stub://anything".into()), CaptureBackend::Any)
            .is_ok());
    }

    #[test]
    fn released_handle_reads_nothing() -> Result<()> {
        let mut driver = SyntheticDriver::default();
        let mut handle = driver.open(&SourceId::Index(0), CaptureBackend::Any)?;
        handle.release();
        assert!(!handle.is_opened());
        assert!(handle.read()?.is_none());
        Ok(())
    }
}
