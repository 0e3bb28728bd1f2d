//! Capture capability.
//!
//! This module provides the driver seam between the pipeline and a camera:
//! - `CaptureDriver`: opens a source with a given backend
//! - `CaptureHandle`: an opened device (properties, reads, release)
//! - Synthetic driver (always available, used by tests and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Drivers only acquire and decode. Sequence numbering, reconnection and
//! open-strategy fallback live in `crate::capture`.

mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::PixelLayout;

pub(crate) use normalize::{normalize_to_rgb, SourceFormat};
pub use synthetic::{SyntheticConfig, SyntheticDriver};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Driver;

/// Identifies a camera: a numeric device index or a path / URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
    Index(u32),
    Uri(String),
}

impl Default for SourceId {
    fn default() -> Self {
        SourceId::Index(0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Index(index) => write!(f, "{}", index),
            SourceId::Uri(uri) => f.write_str(uri),
        }
    }
}

impl FromStr for SourceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<u32>() {
            Ok(index) => SourceId::Index(index),
            Err(_) => SourceId::Uri(trimmed.to_string()),
        })
    }
}

impl From<u32> for SourceId {
    fn from(index: u32) -> Self {
        SourceId::Index(index)
    }
}

/// Capture API backend a driver may be asked to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureBackend {
    V4l2,
    DirectShow,
    AvFoundation,
    /// Whatever the driver picks by default.
    Any,
}

impl CaptureBackend {
    /// Backend the current platform should try first.
    pub fn platform_preferred() -> Self {
        if cfg!(target_os = "linux") {
            CaptureBackend::V4l2
        } else if cfg!(target_os = "windows") {
            CaptureBackend::DirectShow
        } else if cfg!(target_os = "macos") {
            CaptureBackend::AvFoundation
        } else {
            CaptureBackend::Any
        }
    }
}

/// One way of acquiring a device. `CaptureSource` walks a list of these in
/// order until one yields an opened handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenStrategy {
    pub backend: CaptureBackend,
}

impl OpenStrategy {
    /// Platform backend first, then the generic one.
    pub fn platform_defaults() -> Vec<OpenStrategy> {
        let preferred = CaptureBackend::platform_preferred();
        let mut strategies = vec![OpenStrategy { backend: preferred }];
        if preferred != CaptureBackend::Any {
            strategies.push(OpenStrategy {
                backend: CaptureBackend::Any,
            });
        }
        strategies
    }
}

/// Tunable device properties. Applying them is best-effort.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureProperty {
    FrameWidth(u32),
    FrameHeight(u32),
    /// Internal driver buffering depth, in frames.
    BufferSize(u32),
    Fps(u32),
}

/// Raw image returned by a handle. Sequence numbers are assigned later.
#[derive(Debug)]
pub struct CapturedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

/// Driver that can turn a `SourceId` into an open device handle.
pub trait CaptureDriver: Send {
    /// Driver identifier for logs.
    fn name(&self) -> &'static str;

    /// Try to open `source` with `backend`.
    ///
    /// A returned handle may still report `is_opened() == false`; callers
    /// treat that the same as an error and move to the next strategy.
    fn open(&mut self, source: &SourceId, backend: CaptureBackend)
        -> Result<Box<dyn CaptureHandle>>;
}

/// An acquired device.
pub trait CaptureHandle: Send {
    fn is_opened(&self) -> bool;

    fn set_property(&mut self, property: CaptureProperty) -> Result<()>;

    /// Next frame, or `Ok(None)` when the device produced nothing.
    fn read(&mut self) -> Result<Option<CapturedImage>>;

    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_parse_indices_and_uris() {
        assert_eq!("2".parse::<SourceId>().unwrap(), SourceId::Index(2));
        assert_eq!(
            "/dev/video4".parse::<SourceId>().unwrap(),
            SourceId::Uri("/dev/video4".to_string())
        );
        assert_eq!(SourceId::Index(3).to_string(), "3");
    }

    #[test]
    fn platform_defaults_end_with_generic_backend() {
        let strategies = OpenStrategy::platform_defaults();
        assert_eq!(
            strategies.last().map(|s| s.backend),
            Some(CaptureBackend::Any)
        );
        assert_eq!(
            strategies.first().map(|s| s.backend),
            Some(CaptureBackend::platform_preferred())
        );
    }
}
