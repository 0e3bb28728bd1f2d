//! Frame acquisition / inference decoupling pipeline.
//!
//! Two threads per camera:
//! - the primary loop (`Pipeline::tick` / `Pipeline::run`) reads frames under
//!   the capture lock, routes every N-th one to the input slot, reconciles
//!   the newest inference output with the live frame and paces emission
//! - the inference worker (`InferenceStage`) detects, annotates and encodes
//!   selected frames and offers the result to the output slot
//!
//! Neither thread ever blocks on the other: both slots are bounded and their
//! writers drop instead of waiting. The running flag is the only cancellation
//! signal. Other threads talk to the pipeline through a `PipelineHandle`.

pub mod inference;
pub mod pacer;
pub mod reconcile;
pub mod resources;
pub mod scheduler;
pub mod slot;
pub mod stats;
pub mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::capture::{CaptureSource, Ready};
use crate::config::PipelineConfig;
use crate::detect::{DetectionResult, DetectorBackend};
use crate::encode::FrameEncoder;
use crate::error::OpenError;
use crate::frame::{Frame, FrameId, OutputOrigin, RenderedOutput};
use crate::ingest::{CaptureDriver, SourceId};

pub use inference::{InferenceOutput, InferenceStage};
pub use pacer::OutputPacer;
pub use reconcile::ResultReconciler;
pub use resources::{ResourceSampler, ResourceUsage};
pub use scheduler::FrameScheduler;
pub use slot::{bounded_slot, Offer, Overflow, SlotClosed, SlotReceiver, SlotSender};
pub use stats::{PipelineStats, StatsCounters, StatsRecorder};
pub use supervisor::{HealthState, LinkState, ReconnectSupervisor};

const INPUT_SLOT_CAPACITY: usize = 2;
const OUTPUT_SLOT_CAPACITY: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Starting,
    Streaming,
    Reconnecting,
    /// Terminal.
    Stopped,
}

/// Current configuration, swapped wholesale on replacement.
#[derive(Clone)]
pub(crate) struct SharedConfig(Arc<RwLock<Arc<PipelineConfig>>>);

impl SharedConfig {
    fn new(config: PipelineConfig) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(config))))
    }

    pub(crate) fn current(&self) -> Arc<PipelineConfig> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, config: PipelineConfig) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

/// Everything behind the capture lock.
struct CaptureState {
    source: CaptureSource,
    supervisor: ReconnectSupervisor,
    /// Set by a successful source switch; the reconciler rejects results
    /// captured before it.
    switch_floor: Option<FrameId>,
}

struct Shared {
    capture: Mutex<CaptureState>,
    config: SharedConfig,
    state: Mutex<PipelineState>,
    latest_output: Mutex<Option<RenderedOutput>>,
    latest_result: Mutex<Option<DetectionResult>>,
    running: Arc<AtomicBool>,
    stats: StatsRecorder,
}

impl Shared {
    fn set_state(&self, next: PipelineState) {
        let mut state = lock(&self.state);
        if *state != PipelineState::Stopped && *state != next {
            log::info!("pipeline state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Pipeline {
    shared: Arc<Shared>,
    scheduler: FrameScheduler,
    reconciler: ResultReconciler,
    pacer: OutputPacer,
    resources: ResourceSampler,
    encoder: Arc<dyn FrameEncoder>,
    input: Option<SlotSender<Frame>>,
    output: SlotReceiver<InferenceOutput>,
    worker: Option<JoinHandle<()>>,
    applied: Arc<PipelineConfig>,
}

impl Pipeline {
    /// Warm the detector up, open the initial source and start the inference
    /// worker. An unavailable camera is not fatal: the supervisor keeps
    /// retrying it from the primary loop.
    pub fn start(
        config: PipelineConfig,
        source: SourceId,
        driver: Box<dyn CaptureDriver>,
        detector: Box<dyn DetectorBackend>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self> {
        Self::start_with_capture(
            config,
            CaptureSource::new(driver, source),
            detector,
            encoder,
        )
    }

    /// Like `start`, with a pre-built capture source (custom open strategies).
    pub fn start_with_capture(
        config: PipelineConfig,
        mut capture: CaptureSource,
        detector: Box<dyn DetectorBackend>,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline configuration")?;
        let stats = StatsRecorder::new();

        let mut stage = InferenceStage::new(detector, Arc::clone(&encoder), stats.clone());
        stage.warm_up(&config)?;

        let source = capture.source_id().clone();
        let opened = match capture.open(&source, &config.capture_settings()) {
            Ok(ready) => {
                log::info!(
                    "pipeline capturing from {} ({:?}, session {})",
                    ready.source,
                    ready.backend,
                    ready.session
                );
                true
            }
            Err(err) => {
                log::warn!("pipeline starting without a camera: {}", err);
                false
            }
        };

        let (input_tx, input_rx) = bounded_slot(INPUT_SLOT_CAPACITY, Overflow::DropNewest);
        let (output_tx, output_rx) = bounded_slot(OUTPUT_SLOT_CAPACITY, Overflow::DropOldest);
        let running = Arc::new(AtomicBool::new(true));
        let shared_config = SharedConfig::new(config);
        let applied = shared_config.current();

        let shared = Arc::new(Shared {
            capture: Mutex::new(CaptureState {
                source: capture,
                supervisor: ReconnectSupervisor::new(applied.reconnect_threshold),
                switch_floor: None,
            }),
            config: shared_config.clone(),
            state: Mutex::new(PipelineState::Starting),
            latest_output: Mutex::new(None),
            latest_result: Mutex::new(None),
            running: Arc::clone(&running),
            stats,
        });

        let worker = stage.spawn(input_rx, output_tx, shared_config, running)?;
        shared.set_state(if opened {
            PipelineState::Streaming
        } else {
            PipelineState::Reconnecting
        });

        Ok(Self {
            shared,
            scheduler: FrameScheduler::new(applied.frame_skip),
            reconciler: ResultReconciler::new(),
            pacer: OutputPacer::new(applied.target_fps),
            resources: ResourceSampler::default(),
            encoder,
            input: Some(input_tx),
            output: output_rx,
            worker: Some(worker),
            applied,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// One primary-loop iteration: read, route, reconcile, pace. Returns the
    /// emitted output, if this tick had anything to emit.
    pub fn tick(&mut self) -> Option<RenderedOutput> {
        if !self.is_running() {
            return None;
        }
        let stats = self.shared.stats.clone();
        stats.record_tick();
        if let Some(usage) = self.resources.poll(Instant::now()) {
            stats.record_resources(usage);
        }
        let config = self.refresh_config();

        let (read, link, open, floor) = {
            let mut capture = lock(&self.shared.capture);
            let CaptureState {
                source,
                supervisor,
                switch_floor,
            } = &mut *capture;
            let read = supervisor.read(source, &config.capture_settings());
            (read, supervisor.link(), source.is_open(), switch_floor.take())
        };
        if let Some(floor) = floor {
            self.reconciler.reset(floor);
            *lock(&self.shared.latest_result) = None;
        }
        self.shared.set_state(match link {
            LinkState::Healthy | LinkState::Degrading(_) if open => PipelineState::Streaming,
            _ => PipelineState::Reconnecting,
        });

        let frame = match read {
            Ok(frame) => {
                stats.record_capture();
                if self.scheduler.should_infer() {
                    if let Some(input) = &self.input {
                        let accepted = input.offer(frame.clone()) == Offer::Accepted;
                        stats.record_submission(accepted);
                    }
                }
                Some(frame)
            }
            Err(err) => {
                stats.record_read_failure();
                log::debug!("pipeline read failed: {}", err);
                None
            }
        };

        let newest = self.output.drain_latest_by(|out| out.output.frame);
        let emitted = match self.reconciler.tick(
            newest,
            frame.as_ref(),
            self.encoder.as_ref(),
            config.jpeg_quality,
        ) {
            Ok(emitted) => emitted,
            Err(err) => {
                log::error!("pipeline could not encode raw frame: {}", err);
                stats.record_encode_failure();
                None
            }
        };
        stats.record_slot_discards(
            self.input.as_ref().map_or(0, |input| input.discarded()),
            self.output.discarded(),
        );
        let output = emitted?;

        if output.origin == OutputOrigin::Inferred {
            *lock(&self.shared.latest_result) = self.reconciler.latest_result().cloned();
        }
        self.pacer.pace();
        stats.record_emission(self.pacer.realized_fps());
        *lock(&self.shared.latest_output) = Some(output.clone());
        Some(output)
    }

    /// Drive the primary loop until stopped, handing every output to `sink`.
    /// A sink error stops the pipeline and is returned.
    pub fn run<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&RenderedOutput) -> Result<()>,
    {
        while self.is_running() {
            match self.tick() {
                Some(output) => {
                    if let Err(err) = sink(&output) {
                        self.shutdown();
                        return Err(err.context("output sink failed"));
                    }
                }
                None => self.idle(),
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Back off for one output interval when a tick had nothing to emit.
    pub fn idle(&self) {
        thread::sleep(self.pacer.interval());
    }

    /// Stop the worker, release the camera and enter `Stopped`. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        drop(self.input.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("inference worker panicked");
            }
        }
        {
            let mut capture = lock(&self.shared.capture);
            capture.source.close();
        }
        self.shared.set_state(PipelineState::Stopped);
    }

    /// Pick up a replaced configuration.
    fn refresh_config(&mut self) -> Arc<PipelineConfig> {
        let current = self.shared.config.current();
        if !Arc::ptr_eq(&current, &self.applied) {
            self.scheduler.set_interval(current.frame_skip);
            self.pacer.set_target_fps(current.target_fps);
            lock(&self.shared.capture)
                .supervisor
                .set_threshold(current.reconnect_threshold);
            if current.resolution != self.applied.resolution {
                log::info!(
                    "resolution {} takes effect on the next camera open",
                    current.resolution
                );
            }
            self.applied = Arc::clone(&current);
        }
        current
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable cross-thread view of a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Most recent emitted output.
    pub fn latest_output(&self) -> Option<RenderedOutput> {
        lock(&self.shared.latest_output).clone()
    }

    /// Detections behind the most recent annotated output.
    pub fn latest_detections(&self) -> Option<DetectionResult> {
        lock(&self.shared.latest_result).clone()
    }

    /// Release the current camera and open `source`. On success the
    /// reconciler's cached output is dropped so raw frames are shown until
    /// the new source produces results.
    pub fn switch_source(&self, source: SourceId) -> Result<Ready, OpenError> {
        let settings = self.shared.config.current().capture_settings();
        let mut capture = lock(&self.shared.capture);
        let result = capture.source.open(&source, &settings);
        capture.supervisor.reset();
        if let Ok(ready) = &result {
            capture.switch_floor = Some(FrameId::new(ready.session, 0));
        }
        result
    }

    pub fn stats(&self) -> PipelineStats {
        let config = self.shared.config.current();
        let health = {
            let capture = lock(&self.shared.capture);
            capture.supervisor.health(&capture.source)
        };
        PipelineStats {
            counters: self.shared.stats.counters(),
            state: self.state(),
            health,
            resolution: config.resolution,
            target_fps: config.target_fps,
            frame_skip: config.frame_skip,
            confidence: config.confidence,
        }
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.shared.state)
    }

    pub fn config(&self) -> Arc<PipelineConfig> {
        self.shared.config.current()
    }

    /// Swap in a new configuration. The primary loop applies it on its next
    /// tick; resolution changes apply on the next camera open.
    pub fn replace_config(&self, config: PipelineConfig) -> Result<()> {
        config.validate().context("rejected pipeline configuration")?;
        self.shared.config.replace(config);
        Ok(())
    }

    /// Clear the running flag. The primary loop and the worker exit at their
    /// next check.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            log::info!("pipeline stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::encode::JpegEncoder;
    use crate::frame::FrameSize;
    use crate::ingest::{SyntheticConfig, SyntheticDriver};
    use std::time::Duration;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            resolution: FrameSize::new(64, 48),
            target_fps: 500,
            frame_skip: 1,
            settle_delay: Duration::from_millis(1),
            inference_wait: Duration::from_millis(20),
            ..PipelineConfig::default()
        }
    }

    fn synthetic() -> Box<SyntheticDriver> {
        Box::new(SyntheticDriver::new(SyntheticConfig {
            width: 64,
            height: 48,
            ..SyntheticConfig::default()
        }))
    }

    #[test]
    fn first_tick_emits_raw_frame() {
        let mut pipeline = Pipeline::start(
            small_config(),
            SourceId::Index(0),
            synthetic(),
            Box::new(StubBackend::new()),
            Arc::new(JpegEncoder),
        )
        .unwrap();
        assert_eq!(pipeline.handle().state(), PipelineState::Streaming);

        let out = pipeline.tick().unwrap();
        assert_eq!(out.frame, FrameId::new(1, 0));
        assert!(!out.danger);
        assert!(pipeline.handle().latest_output().is_some());
        pipeline.shutdown();
        assert_eq!(pipeline.handle().state(), PipelineState::Stopped);
    }

    #[test]
    fn missing_camera_starts_in_reconnecting() {
        let mut pipeline = Pipeline::start(
            small_config(),
            SourceId::Index(7),
            synthetic(),
            Box::new(StubBackend::new()),
            Arc::new(JpegEncoder),
        )
        .unwrap();
        assert_eq!(pipeline.handle().state(), PipelineState::Reconnecting);
        assert!(pipeline.tick().is_none());
        let stats = pipeline.handle().stats();
        assert_eq!(stats.counters.read_failures, 1);
        assert_eq!(stats.state, PipelineState::Reconnecting);
        assert_eq!(stats.health.link, LinkState::Degrading(1));
    }

    #[test]
    fn replaced_config_is_applied_on_next_tick() {
        let mut pipeline = Pipeline::start(
            small_config(),
            SourceId::Index(0),
            synthetic(),
            Box::new(StubBackend::new()),
            Arc::new(JpegEncoder),
        )
        .unwrap();
        let handle = pipeline.handle();
        handle
            .replace_config(PipelineConfig {
                frame_skip: 4,
                ..small_config()
            })
            .unwrap();
        pipeline.tick();
        assert_eq!(pipeline.scheduler.interval(), 4);
        assert_eq!(handle.stats().frame_skip, 4);

        assert!(handle
            .replace_config(PipelineConfig {
                frame_skip: 0,
                ..small_config()
            })
            .is_err());
    }

    #[test]
    fn stop_ends_run() {
        let mut pipeline = Pipeline::start(
            small_config(),
            SourceId::Index(0),
            synthetic(),
            Box::new(StubBackend::new()),
            Arc::new(JpegEncoder),
        )
        .unwrap();
        let handle = pipeline.handle();
        let mut emitted = 0;
        pipeline
            .run(|_| {
                emitted += 1;
                if emitted == 5 {
                    handle.stop();
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(emitted, 5);
        assert_eq!(handle.state(), PipelineState::Stopped);
    }
}
