//! Capture source: owns the device handle and stamps frames.
//!
//! `CaptureSource` is responsible for:
//! - Releasing the previous handle and waiting out the settle delay on reopen
//! - Walking the ordered open strategies until a handle reports itself open
//! - Requesting resolution, buffer depth and FPS (best-effort)
//! - Assigning `FrameId`s: a new session per open, `seq` from zero
//!
//! It is not internally synchronised. The pipeline keeps it behind the single
//! capture lock together with the reconnect supervisor.

use std::time::Duration;

use crate::error::{OpenError, ReadError};
use crate::frame::{Frame, FrameId, FrameSize};
use crate::ingest::{
    CaptureBackend, CaptureDriver, CaptureHandle, CaptureProperty, OpenStrategy, SourceId,
};

/// Settings applied to a freshly opened handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureSettings {
    pub resolution: FrameSize,
    pub target_fps: u32,
    pub settle_delay: Duration,
}

/// Successful open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ready {
    pub source: SourceId,
    pub backend: CaptureBackend,
    pub session: u64,
}

pub struct CaptureSource {
    driver: Box<dyn CaptureDriver>,
    strategies: Vec<OpenStrategy>,
    handle: Option<Box<dyn CaptureHandle>>,
    /// Last source that was opened, or the one first requested.
    source: SourceId,
    session: u64,
    next_seq: u64,
    frames_captured: u64,
}

impl CaptureSource {
    pub fn new(driver: Box<dyn CaptureDriver>, initial: SourceId) -> Self {
        Self::with_strategies(driver, initial, OpenStrategy::platform_defaults())
    }

    pub fn with_strategies(
        driver: Box<dyn CaptureDriver>,
        initial: SourceId,
        strategies: Vec<OpenStrategy>,
    ) -> Self {
        Self {
            driver,
            strategies,
            handle: None,
            source: initial,
            session: 0,
            next_seq: 0,
            frames_captured: 0,
        }
    }

    /// Open `source`, replacing any held handle.
    ///
    /// On failure the source is left closed but `source_id()` still names the
    /// last source that opened, so a later reconnect retries that one.
    pub fn open(
        &mut self,
        source: &SourceId,
        settings: &CaptureSettings,
    ) -> Result<Ready, OpenError> {
        if self.close() {
            std::thread::sleep(settings.settle_delay);
        }

        let mut tried = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            tried.push(strategy.backend);
            match self.driver.open(source, strategy.backend) {
                Ok(mut handle) if handle.is_opened() => {
                    apply_settings(handle.as_mut(), source, settings);
                    self.handle = Some(handle);
                    self.source = source.clone();
                    self.session += 1;
                    self.next_seq = 0;
                    log::info!(
                        "CaptureSource: switched to {} via {:?} ({} driver, session {})",
                        source,
                        strategy.backend,
                        self.driver.name(),
                        self.session
                    );
                    return Ok(Ready {
                        source: source.clone(),
                        backend: strategy.backend,
                        session: self.session,
                    });
                }
                Ok(mut handle) => {
                    log::warn!(
                        "CaptureSource: {} did not report opened via {:?}, trying next backend",
                        source,
                        strategy.backend
                    );
                    handle.release();
                }
                Err(err) => {
                    log::warn!(
                        "CaptureSource: opening {} via {:?} failed: {:#}",
                        source,
                        strategy.backend,
                        err
                    );
                }
            }
        }

        log::error!("CaptureSource: cannot open camera source {}", source);
        Err(OpenError::Unavailable {
            source_id: source.clone(),
            tried,
        })
    }

    /// Read and stamp the next frame.
    pub fn read_frame(&mut self) -> Result<Frame, ReadError> {
        let handle = match self.handle.as_mut() {
            Some(handle) if handle.is_opened() => handle,
            _ => return Err(ReadError::NotOpen),
        };
        let image = match handle.read() {
            Ok(Some(image)) => image,
            Ok(None) => return Err(ReadError::ReadFailed("empty read".to_string())),
            Err(err) => return Err(ReadError::ReadFailed(format!("{:#}", err))),
        };

        let id = FrameId::new(self.session, self.next_seq);
        self.next_seq += 1;
        self.frames_captured += 1;
        Ok(Frame::new(
            image.data,
            image.width,
            image.height,
            image.layout,
            id,
        ))
    }

    /// Release the handle. Returns whether one was held.
    pub fn close(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => {
                handle.release();
                log::info!("CaptureSource: released {}", self.source);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_opened())
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn apply_settings(handle: &mut dyn CaptureHandle, source: &SourceId, settings: &CaptureSettings) {
    let properties = [
        CaptureProperty::FrameWidth(settings.resolution.width),
        CaptureProperty::FrameHeight(settings.resolution.height),
        CaptureProperty::BufferSize(1),
        CaptureProperty::Fps(settings.target_fps),
    ];
    for property in properties {
        if let Err(err) = handle.set_property(property) {
            log::warn!(
                "CaptureSource: could not apply {:?} to {}: {:#}",
                property,
                source,
                err
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CapturedImage, SyntheticConfig, SyntheticDriver};
    use anyhow::{anyhow, Result};
    use std::sync::{Arc, Mutex};

    fn settings() -> CaptureSettings {
        CaptureSettings {
            resolution: FrameSize::new(16, 8),
            target_fps: 30,
            settle_delay: Duration::ZERO,
        }
    }

    fn synthetic() -> Box<dyn CaptureDriver> {
        Box::new(SyntheticDriver::new(SyntheticConfig {
            hazard_period: 0,
            ..SyntheticConfig::default()
        }))
    }

    /// Driver whose handles only open for the generic backend.
    struct PickyDriver {
        attempts: Arc<Mutex<Vec<CaptureBackend>>>,
    }

    struct PickyHandle {
        opened: bool,
    }

    impl CaptureHandle for PickyHandle {
        fn is_opened(&self) -> bool {
            self.opened
        }
        fn set_property(&mut self, _property: CaptureProperty) -> Result<()> {
            Err(anyhow!("read-only device"))
        }
        fn read(&mut self) -> Result<Option<CapturedImage>> {
            Ok(Some(CapturedImage {
                data: vec![0; 3],
                width: 1,
                height: 1,
                layout: crate::frame::PixelLayout::Bgr8,
            }))
        }
        fn release(&mut self) {
            self.opened = false;
        }
    }

    impl CaptureDriver for PickyDriver {
        fn name(&self) -> &'static str {
            "picky"
        }
        fn open(
            &mut self,
            _source: &SourceId,
            backend: CaptureBackend,
        ) -> Result<Box<dyn CaptureHandle>> {
            self.attempts.lock().unwrap().push(backend);
            Ok(Box::new(PickyHandle {
                opened: backend == CaptureBackend::Any,
            }))
        }
    }

    #[test]
    fn read_without_handle_is_not_open() {
        let mut source = CaptureSource::new(synthetic(), SourceId::Index(0));
        assert_eq!(source.read_frame().unwrap_err(), ReadError::NotOpen);
    }

    #[test]
    fn sequence_numbers_increase_and_reset_on_reopen() {
        let mut source = CaptureSource::new(synthetic(), SourceId::Index(0));
        let ready = source.open(&SourceId::Index(0), &settings()).unwrap();
        assert_eq!(ready.session, 1);

        let seqs: Vec<u64> = (0..3).map(|_| source.read_frame().unwrap().seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        source.open(&SourceId::Index(0), &settings()).unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.id, FrameId::new(2, 0));
        assert_eq!((frame.width, frame.height), (16, 8));
    }

    #[test]
    fn falls_back_to_generic_backend() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let driver = PickyDriver {
            attempts: Arc::clone(&attempts),
        };
        let strategies = vec![
            OpenStrategy {
                backend: CaptureBackend::V4l2,
            },
            OpenStrategy {
                backend: CaptureBackend::Any,
            },
        ];
        let mut source =
            CaptureSource::with_strategies(Box::new(driver), SourceId::Index(0), strategies);

        let ready = source.open(&SourceId::Index(0), &settings()).unwrap();
        assert_eq!(ready.backend, CaptureBackend::Any);
        assert_eq!(
            *attempts.lock().unwrap(),
            vec![CaptureBackend::V4l2, CaptureBackend::Any]
        );
        // property failures are tolerated
        assert!(source.read_frame().is_ok());
    }

    #[test]
    fn failed_open_keeps_last_source_and_closes() {
        let mut source = CaptureSource::new(synthetic(), SourceId::Index(0));
        source.open(&SourceId::Index(0), &settings()).unwrap();

        let err = source.open(&SourceId::Index(9), &settings()).unwrap_err();
        assert!(matches!(err, OpenError::Unavailable { .. }));
        assert!(!source.is_open());
        assert_eq!(source.source_id(), &SourceId::Index(0));
    }
}
