//! Reconnect supervisor.
//!
//! Counts consecutive read failures and reopens the last-known source once the
//! threshold is reached. Lives behind the capture lock with the
//! `CaptureSource` it supervises; every method takes the source explicitly.

use serde::Serialize;

use crate::capture::{CaptureSettings, CaptureSource};
use crate::error::ReadError;
use crate::frame::Frame;
use crate::ingest::SourceId;

/// Supervisor state. `Degrading(n)` carries the consecutive failure count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Healthy,
    Degrading(u32),
    Reconnecting,
    /// The last reopen attempt failed. Retried on the next read cycle.
    Failed,
}

/// Snapshot of capture health.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub source: SourceId,
    pub open: bool,
    pub link: LinkState,
    pub reconnect_attempts: u64,
}

pub struct ReconnectSupervisor {
    threshold: u32,
    failures: u32,
    link: LinkState,
    reconnect_attempts: u64,
}

impl ReconnectSupervisor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: 0,
            link: LinkState::Healthy,
            reconnect_attempts: 0,
        }
    }

    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
    }

    /// One read cycle: read a frame, and on a failure that reaches the
    /// threshold, attempt exactly one reopen of the last-known source.
    pub fn read(
        &mut self,
        source: &mut CaptureSource,
        settings: &CaptureSettings,
    ) -> Result<Frame, ReadError> {
        match source.read_frame() {
            Ok(frame) => {
                self.record_success();
                Ok(frame)
            }
            Err(err) => {
                self.record_failure(&err);
                if self.failures >= self.threshold {
                    self.reconnect(source, settings);
                }
                Err(err)
            }
        }
    }

    fn record_success(&mut self) {
        if self.link != LinkState::Healthy {
            log::info!("ReconnectSupervisor: capture healthy again");
        }
        self.failures = 0;
        self.link = LinkState::Healthy;
    }

    fn record_failure(&mut self, err: &ReadError) {
        self.failures = self.failures.saturating_add(1);
        if self.failures < self.threshold {
            self.link = LinkState::Degrading(self.failures);
        }
        log::debug!(
            "ReconnectSupervisor: read failure {}/{}: {}",
            self.failures,
            self.threshold,
            err
        );
    }

    fn reconnect(&mut self, source: &mut CaptureSource, settings: &CaptureSettings) {
        let target = source.source_id().clone();
        self.link = LinkState::Reconnecting;
        self.reconnect_attempts += 1;
        log::warn!(
            "ReconnectSupervisor: camera disconnected after {} failed reads, reopening {}",
            self.failures,
            target
        );
        match source.open(&target, settings) {
            Ok(_) => {
                self.failures = 0;
                self.link = LinkState::Healthy;
            }
            Err(err) => {
                log::error!("ReconnectSupervisor: reopen failed: {}", err);
                self.link = LinkState::Failed;
            }
        }
    }

    /// Forget accumulated failures, e.g. after an explicit source switch.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.link = LinkState::Healthy;
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn health(&self, source: &CaptureSource) -> HealthState {
        HealthState {
            consecutive_failures: self.failures,
            source: source.source_id().clone(),
            open: source.is_open(),
            link: self.link,
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameSize, PixelLayout};
    use crate::ingest::{
        CaptureBackend, CaptureDriver, CaptureHandle, CaptureProperty, CapturedImage,
    };
    use anyhow::Result;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Handle that replays a script of read outcomes, then succeeds forever.
    struct ScriptedHandle {
        script: Arc<Mutex<VecDeque<bool>>>,
    }

    impl CaptureHandle for ScriptedHandle {
        fn is_opened(&self) -> bool {
            true
        }
        fn set_property(&mut self, _property: CaptureProperty) -> Result<()> {
            Ok(())
        }
        fn read(&mut self) -> Result<Option<CapturedImage>> {
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            Ok(ok.then(|| CapturedImage {
                data: vec![0; 3],
                width: 1,
                height: 1,
                layout: PixelLayout::Bgr8,
            }))
        }
        fn release(&mut self) {}
    }

    struct ScriptedDriver {
        script: Arc<Mutex<VecDeque<bool>>>,
        opens: Arc<Mutex<Vec<SourceId>>>,
    }

    impl CaptureDriver for ScriptedDriver {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn open(
            &mut self,
            source: &SourceId,
            _backend: CaptureBackend,
        ) -> Result<Box<dyn CaptureHandle>> {
            self.opens.lock().unwrap().push(source.clone());
            Ok(Box::new(ScriptedHandle {
                script: Arc::clone(&self.script),
            }))
        }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            resolution: FrameSize::new(1, 1),
            target_fps: 30,
            settle_delay: Duration::ZERO,
        }
    }

    #[test]
    fn success_resets_counter_from_degrading() {
        let script = Arc::new(Mutex::new(VecDeque::from(vec![false, false, true])));
        let opens = Arc::new(Mutex::new(Vec::new()));
        let driver = ScriptedDriver {
            script,
            opens: Arc::clone(&opens),
        };
        let mut source = CaptureSource::new(Box::new(driver), SourceId::Index(1));
        source.open(&SourceId::Index(1), &settings()).unwrap();
        let mut supervisor = ReconnectSupervisor::new(10);

        assert!(supervisor.read(&mut source, &settings()).is_err());
        assert!(supervisor.read(&mut source, &settings()).is_err());
        assert_eq!(supervisor.link(), LinkState::Degrading(2));

        assert!(supervisor.read(&mut source, &settings()).is_ok());
        assert_eq!(supervisor.consecutive_failures(), 0);
        assert_eq!(supervisor.link(), LinkState::Healthy);
        assert_eq!(opens.lock().unwrap().len(), 1);
    }

    #[test]
    fn not_open_counts_as_failure_and_triggers_reopen() {
        let script = Arc::new(Mutex::new(VecDeque::new()));
        let opens = Arc::new(Mutex::new(Vec::new()));
        let driver = ScriptedDriver {
            script,
            opens: Arc::clone(&opens),
        };
        // never opened: every read is NotOpen
        let mut source = CaptureSource::new(Box::new(driver), SourceId::Index(4));
        let mut supervisor = ReconnectSupervisor::new(2);

        assert_eq!(
            supervisor.read(&mut source, &settings()).unwrap_err(),
            ReadError::NotOpen
        );
        assert!(opens.lock().unwrap().is_empty());
        assert!(supervisor.read(&mut source, &settings()).is_err());
        assert_eq!(*opens.lock().unwrap(), vec![SourceId::Index(4)]);
        assert_eq!(supervisor.link(), LinkState::Healthy);
        assert!(supervisor.read(&mut source, &settings()).is_ok());
    }
}
