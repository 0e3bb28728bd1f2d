//! Firewatch edge pipeline
//!
//! Streams annotated video from a camera while running fire / smoke detection
//! on a subset of frames.
//!
//! # Architecture
//!
//! The pipeline keeps capture and inference decoupled:
//!
//! 1. **Capture never waits on inference**: selected frames are copied into a
//!    bounded slot that drops instead of blocking.
//! 2. **Output always has something to show**: the newest annotated frame,
//!    else the last one, else the raw frame.
//! 3. **Results never go backwards**: an inference result older than one
//!    already emitted is discarded.
//! 4. **Device failure is recovered in place**: sustained read failures reopen
//!    the last-known camera.
//!
//! # Module Structure
//!
//! - `frame`: frame and output types (`Frame`, `FrameId`, `RenderedOutput`)
//! - `ingest`: capture drivers (synthetic, V4L2)
//! - `capture`: `CaptureSource`, open strategies and frame stamping
//! - `detect`: detector backends and detection results
//! - `encode`, `annotate`: JPEG compression and box drawing
//! - `pipeline`: scheduler, inference stage, reconciler, pacer, supervisor,
//!   stats and host resource sampling
//! - `stream`, `probe`: MJPEG part framing and camera enumeration
//! - `config`: pipeline configuration, device presets, file and env loading

pub mod annotate;
pub mod capture;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod probe;
pub mod stream;

pub use capture::{CaptureSettings, CaptureSource, Ready};
pub use config::{AppConfig, DevicePreset, ModelSize, PipelineConfig};
pub use detect::{
    build_backend, BackendKind, DangerLabels, Detection, DetectionResult, DetectorBackend,
    DetectorSettings,
};
pub use encode::{FrameEncoder, JpegEncoder};
pub use error::{EncodeError, InferenceError, OpenError, ReadError};
pub use frame::{Frame, FrameId, FrameSize, OutputOrigin, PixelLayout, RenderedOutput};
pub use ingest::{CaptureBackend, CaptureDriver, CaptureHandle, SourceId};
pub use pipeline::{Pipeline, PipelineHandle, PipelineState, PipelineStats};
