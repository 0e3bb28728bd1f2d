use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use firewatch_edge::detect::{BoundingBox, CpuBackend};
use firewatch_edge::ingest::{CaptureProperty, CapturedImage, SyntheticConfig, SyntheticDriver};
use firewatch_edge::{
    CaptureBackend, CaptureDriver, CaptureHandle, Detection, DetectorBackend, Frame, FrameSize,
    JpegEncoder, OutputOrigin, PixelLayout, Pipeline, PipelineConfig, PipelineHandle,
    RenderedOutput, SourceId,
};

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

/// Delivers `total` frames, then reports no frame forever.
struct FiniteCamera {
    remaining: u64,
}

impl CaptureHandle for FiniteCamera {
    fn is_opened(&self) -> bool {
        true
    }

    fn set_property(&mut self, _property: CaptureProperty) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<CapturedImage>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(CapturedImage {
            data: vec![64; (WIDTH * HEIGHT * 3) as usize],
            width: WIDTH,
            height: HEIGHT,
            layout: PixelLayout::Bgr8,
        }))
    }

    fn release(&mut self) {}
}

struct FiniteDriver {
    total: u64,
}

impl CaptureDriver for FiniteDriver {
    fn name(&self) -> &'static str {
        "finite"
    }

    fn open(
        &mut self,
        _source: &SourceId,
        _backend: CaptureBackend,
    ) -> Result<Box<dyn CaptureHandle>> {
        Ok(Box::new(FiniteCamera {
            remaining: self.total,
        }))
    }
}

/// Reports a confident fire on exactly one frame.
struct FireOnFrame {
    seq: u64,
}

impl DetectorBackend for FireOnFrame {
    fn name(&self) -> &'static str {
        "fire-on-frame"
    }

    fn detect(&mut self, frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
        if frame.id.seq != self.seq || frame.id.session == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            label: "fire".to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 4.0,
                y1: 4.0,
                x2: 20.0,
                y2: 16.0,
            },
        }])
    }
}

fn config(frame_skip: u32) -> PipelineConfig {
    PipelineConfig {
        resolution: FrameSize::new(WIDTH, HEIGHT),
        target_fps: 100,
        frame_skip,
        confidence: 0.15,
        settle_delay: Duration::from_millis(1),
        inference_wait: Duration::from_millis(20),
        ..PipelineConfig::default()
    }
}

/// Block until the worker has finished every frame handed to it, plus a
/// margin for annotating and encoding the last one. Keeps the loop in
/// lockstep so no frame is dropped at the input slot and no two results are
/// pending at the same drain.
fn wait_for_worker(handle: &PipelineHandle) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let counters = handle.stats().counters;
        if counters.inferred_frames + counters.inference_failures >= counters.frames_submitted {
            break;
        }
        assert!(Instant::now() < deadline, "inference worker stalled");
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(20));
}

#[test]
fn danger_surfaces_only_after_the_dangerous_frame() {
    let mut pipeline = Pipeline::start(
        config(3),
        SourceId::Index(0),
        Box::new(FiniteDriver { total: 100 }),
        Box::new(FireOnFrame { seq: 30 }),
        Arc::new(JpegEncoder),
    )
    .expect("start pipeline");
    let handle = pipeline.handle();

    let mut outputs: Vec<RenderedOutput> = Vec::new();
    let mut submitted = 0;
    // 100 frames, then a few idle ticks so the last results drain.
    for _ in 0..106 {
        if let Some(out) = pipeline.tick() {
            outputs.push(out);
        }
        let now_submitted = handle.stats().counters.frames_submitted;
        if now_submitted != submitted {
            submitted = now_submitted;
            wait_for_worker(&handle);
        }
    }
    pipeline.shutdown();

    assert!(!outputs.is_empty());
    assert!(
        outputs.iter().all(|o| !o.danger || o.frame.seq >= 30),
        "danger flagged before the fire"
    );
    let danger: Vec<&RenderedOutput> = outputs.iter().filter(|o| o.danger).collect();
    assert!(!danger.is_empty(), "the fire on frame 30 never surfaced");
    // only fresh results carry the flag, and only frame 30 had a fire
    for out in &danger {
        assert_eq!(out.frame.seq, 30);
        assert_eq!(out.origin, OutputOrigin::Inferred);
    }

    // emitted result frames never go backwards
    let inferred: Vec<_> = outputs
        .iter()
        .filter(|o| o.origin != OutputOrigin::Raw)
        .map(|o| o.frame)
        .collect();
    assert!(inferred.windows(2).all(|w| w[0] <= w[1]));

    let stats = handle.stats();
    assert_eq!(stats.counters.captured_frames, 100);
    assert_eq!(stats.counters.detected_fires, 1);
    assert!(stats.counters.last_detection_time.is_some());
    assert_eq!(stats.counters.frames_dropped, 0);
    assert_eq!(
        stats.counters.frames_submitted, 34,
        "frames 0, 3, ..., 99 are routed to inference"
    );
}

#[test]
fn switching_source_drops_cached_output() {
    let driver = SyntheticDriver::new(SyntheticConfig {
        available: vec![SourceId::Index(0), SourceId::Index(1)],
        width: WIDTH,
        height: HEIGHT,
        ..SyntheticConfig::default()
    });
    let mut pipeline = Pipeline::start(
        config(1),
        SourceId::Index(0),
        Box::new(driver),
        Box::new(FireOnFrame { seq: u64::MAX }),
        Arc::new(JpegEncoder),
    )
    .expect("start pipeline");
    let handle = pipeline.handle();

    let mut saw_inferred = false;
    for _ in 0..200 {
        if pipeline.tick().map(|o| o.origin) == Some(OutputOrigin::Inferred) {
            saw_inferred = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(saw_inferred, "worker never produced a result");

    let ready = handle.switch_source(SourceId::Index(1)).expect("switch");
    assert_eq!(ready.session, 2);

    let out = pipeline.tick().expect("output after switch");
    assert_eq!(out.frame.session, 2);
    assert_ne!(out.origin, OutputOrigin::Cached);
    assert_eq!(handle.stats().health.source, SourceId::Index(1));

    assert!(handle.switch_source(SourceId::Index(9)).is_err());
    pipeline.shutdown();
}

#[test]
fn cpu_detector_flags_synthetic_flames() {
    let driver = SyntheticDriver::new(SyntheticConfig {
        width: 128,
        height: 96,
        hazard_period: 2,
        hazard_frames: 1,
        ..SyntheticConfig::default()
    });
    let mut pipeline = Pipeline::start(
        PipelineConfig {
            resolution: FrameSize::new(128, 96),
            ..config(1)
        },
        SourceId::Uri("stub://camera".to_string()),
        Box::new(driver),
        Box::new(CpuBackend::new()),
        Arc::new(JpegEncoder),
    )
    .expect("start pipeline");
    let handle = pipeline.handle();

    let mut flagged = false;
    for _ in 0..100 {
        if pipeline.tick().is_some_and(|o| o.danger) {
            flagged = true;
            break;
        }
    }
    pipeline.shutdown();

    assert!(flagged, "no danger output within 100 ticks");
    let detections = handle.latest_detections().expect("detections");
    assert!(detections.danger);
    assert!(detections.detections.iter().all(|d| d.label == "fire"));
    assert!(handle.stats().counters.detected_fires >= 1);
}
