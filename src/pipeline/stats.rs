//! In-memory pipeline statistics.
//!
//! Both threads record into one `StatsRecorder`. Readers take a
//! `StatsCounters` copy; nothing is persisted.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::resources::ResourceUsage;
use super::supervisor::HealthState;
use super::PipelineState;
use crate::frame::FrameSize;

/// Inference durations kept for the inference-rate estimate.
pub const INFERENCE_WINDOW: usize = 30;

#[derive(Default)]
struct StatsInner {
    counters: StatsCounters,
    inference_times: VecDeque<Duration>,
}

/// Plain counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsCounters {
    /// Primary loop iterations.
    pub ticks: u64,
    pub outputs_emitted: u64,
    pub captured_frames: u64,
    pub read_failures: u64,
    /// Frames routed to inference and accepted by the input slot.
    pub frames_submitted: u64,
    /// Frames routed to inference but dropped because the slot was full.
    pub frames_dropped: u64,
    pub inferred_frames: u64,
    pub inference_failures: u64,
    pub encode_failures: u64,
    pub detected_fires: u64,
    pub detected_smoke: u64,
    pub danger_by_label: BTreeMap<String, u64>,
    /// Realized output rate.
    pub current_fps: f64,
    /// 1 / mean inference duration over the last `INFERENCE_WINDOW` runs.
    pub inference_fps: f64,
    /// Seconds since the Unix epoch of the last danger detection.
    pub last_detection_time: Option<f64>,
    /// Items discarded by the input and output handoff slots.
    pub input_slot_discarded: u64,
    pub output_slot_discarded: u64,
    /// Host CPU usage in percent, refreshed every few seconds.
    pub cpu_usage: f32,
    /// Host memory usage in percent.
    pub memory_usage: f32,
}

/// Shared recorder. Clones record into the same counters.
#[derive(Clone, Default)]
pub struct StatsRecorder {
    inner: Arc<Mutex<StatsInner>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_tick(&self) {
        self.lock().counters.ticks += 1;
    }

    pub fn record_capture(&self) {
        self.lock().counters.captured_frames += 1;
    }

    pub fn record_read_failure(&self) {
        self.lock().counters.read_failures += 1;
    }

    pub fn record_submission(&self, accepted: bool) {
        let mut inner = self.lock();
        if accepted {
            inner.counters.frames_submitted += 1;
        } else {
            inner.counters.frames_dropped += 1;
        }
    }

    pub fn record_emission(&self, realized_fps: f64) {
        let mut inner = self.lock();
        inner.counters.outputs_emitted += 1;
        inner.counters.current_fps = realized_fps;
    }

    pub fn record_inference(&self, took: Duration) {
        let mut inner = self.lock();
        inner.counters.inferred_frames += 1;
        if inner.inference_times.len() == INFERENCE_WINDOW {
            inner.inference_times.pop_front();
        }
        inner.inference_times.push_back(took);
        let total: Duration = inner.inference_times.iter().sum();
        let mean = total.as_secs_f64() / inner.inference_times.len() as f64;
        inner.counters.inference_fps = if mean > 0.0 { 1.0 / mean } else { 0.0 };
    }

    pub fn record_slot_discards(&self, input: u64, output: u64) {
        let mut inner = self.lock();
        inner.counters.input_slot_discarded = input;
        inner.counters.output_slot_discarded = output;
    }

    pub fn record_resources(&self, usage: ResourceUsage) {
        let mut inner = self.lock();
        inner.counters.cpu_usage = usage.cpu_percent;
        inner.counters.memory_usage = usage.memory_percent;
    }

    pub fn record_inference_failure(&self) {
        self.lock().counters.inference_failures += 1;
    }

    pub fn record_encode_failure(&self) {
        self.lock().counters.encode_failures += 1;
    }

    /// One danger detection. `fire` and `smoke` also feed their dedicated
    /// counters.
    pub fn record_danger(&self, label: &str, at: SystemTime) {
        let label = label.to_lowercase();
        let mut inner = self.lock();
        let counters = &mut inner.counters;
        match label.as_str() {
            "fire" => counters.detected_fires += 1,
            "smoke" => counters.detected_smoke += 1,
            _ => {}
        }
        *counters.danger_by_label.entry(label).or_insert(0) += 1;
        counters.last_detection_time = at
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs_f64());
    }

    pub fn counters(&self) -> StatsCounters {
        self.lock().counters.clone()
    }
}

/// Serializable snapshot handed to status consumers.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStats {
    #[serde(flatten)]
    pub counters: StatsCounters,
    pub state: PipelineState,
    pub health: HealthState,
    pub resolution: FrameSize,
    pub target_fps: u32,
    pub frame_skip: u32,
    pub confidence: f32,
}
