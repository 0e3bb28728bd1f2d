//! V4L2 capture driver.
//!
//! Opens local device nodes (`/dev/videoN`, or index `N`) through libv4l.
//! Resolution, FPS and buffer depth are collected as properties and applied
//! when the mmap stream is first started, since V4L2 fixes the format once
//! buffers are allocated.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{
    normalize_to_rgb, CaptureBackend, CaptureDriver, CaptureHandle, CaptureProperty,
    CapturedImage, SourceFormat, SourceId,
};
use crate::frame::PixelLayout;

#[derive(Default)]
pub struct V4l2Driver;

impl V4l2Driver {
    pub fn new() -> Self {
        Self
    }

    fn device_path(source: &SourceId) -> String {
        match source {
            SourceId::Index(index) => format!("/dev/video{}", index),
            SourceId::Uri(path) => path.clone(),
        }
    }
}

impl CaptureDriver for V4l2Driver {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(
        &mut self,
        source: &SourceId,
        backend: CaptureBackend,
    ) -> Result<Box<dyn CaptureHandle>> {
        if !matches!(backend, CaptureBackend::V4l2 | CaptureBackend::Any) {
            return Err(anyhow!("v4l2 driver cannot open via {:?}", backend));
        }
        let path = Self::device_path(source);
        let device = v4l::Device::with_path(&path)
            .with_context(|| format!("open v4l2 device {}", path))?;
        Ok(Box::new(V4l2Handle {
            path,
            device: Some(device),
            state: None,
            requested: Requested::default(),
            active_width: 0,
            active_height: 0,
            active_format: SourceFormat::Rgb24,
        }))
    }
}

#[derive(Default)]
struct Requested {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    buffers: Option<u32>,
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Handle {
    path: String,
    /// Held until the stream starts, then moved into `state`.
    device: Option<v4l::Device>,
    state: Option<V4l2Stream>,
    requested: Requested,
    active_width: u32,
    active_height: u32,
    active_format: SourceFormat,
}

impl V4l2Handle {
    fn start_stream(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("v4l2 device {} already released", self.path))?;

        let mut format = device.format().context("read v4l2 format")?;
        if let Some(width) = self.requested.width {
            format.width = width;
        }
        if let Some(height) = self.requested.height {
            format.height = height;
        }
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Driver: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if let Some(fps) = self.requested.fps.filter(|fps| *fps > 0) {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Driver: failed to set fps on {}: {}", self.path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = match &format.fourcc.repr {
            b"YUYV" => SourceFormat::Yuyv,
            b"NV12" => SourceFormat::Nv12,
            b"BGR3" => SourceFormat::Bgr24,
            b"GREY" => SourceFormat::Gray8,
            _ => SourceFormat::Rgb24,
        };

        let buffers = self.requested.buffers.unwrap_or(1).max(1);
        let state = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffers)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Driver: streaming {} ({}x{}, {} buffers)",
            self.path,
            self.active_width,
            self.active_height,
            buffers
        );
        Ok(())
    }
}

impl CaptureHandle for V4l2Handle {
    fn is_opened(&self) -> bool {
        self.device.is_some() || self.state.is_some()
    }

    fn set_property(&mut self, property: CaptureProperty) -> Result<()> {
        if self.state.is_some() {
            return Err(anyhow!(
                "{:?} ignored: {} is already streaming",
                property,
                self.path
            ));
        }
        match property {
            CaptureProperty::FrameWidth(width) => self.requested.width = Some(width),
            CaptureProperty::FrameHeight(height) => self.requested.height = Some(height),
            CaptureProperty::Fps(fps) => self.requested.fps = Some(fps),
            CaptureProperty::BufferSize(buffers) => self.requested.buffers = Some(buffers),
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<CapturedImage>> {
        use v4l::io::traits::CaptureStream;

        if self.state.is_none() {
            self.start_stream()?;
        }
        let state = self.state.as_mut().context("v4l2 stream not started")?;
        let raw = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        if raw.is_empty() {
            return Ok(None);
        }

        let data = normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;
        Ok(Some(CapturedImage {
            data,
            width: self.active_width,
            height: self.active_height,
            layout: PixelLayout::Rgb8,
        }))
    }

    fn release(&mut self) {
        self.state = None;
        self.device = None;
    }
}
