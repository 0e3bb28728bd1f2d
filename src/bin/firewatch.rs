//! firewatch - edge fire / smoke camera pipeline
//!
//! This binary:
//! 1. Loads configuration (preset, config file, EDGECAM_* env, CLI flags)
//! 2. Builds the capture driver and detector backend
//! 3. Runs the pipeline, writing the multipart MJPEG stream to a file if asked
//! 4. Logs statistics periodically until Ctrl-C or `--duration` elapses

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use firewatch_edge::{
    build_backend, ingest::SyntheticDriver, probe, stream, AppConfig, BackendKind, CaptureDriver,
    DevicePreset, JpegEncoder, Pipeline,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DriverArg {
    Synthetic,
    V4l2,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension). Overrides EDGECAM_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Device preset (raspberry_pi, jetson_nano, x86_high, ...).
    #[arg(long)]
    preset: Option<DevicePreset>,
    /// Camera index or device path / URI.
    #[arg(long)]
    source: Option<String>,
    /// Capture driver. Defaults to v4l2 when built with it.
    #[arg(long, value_enum)]
    driver: Option<DriverArg>,
    /// Detector backend (stub, cpu, tract).
    #[arg(long)]
    detector: Option<BackendKind>,
    /// Model file for model-based detectors.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Inference on every N-th frame.
    #[arg(long)]
    frame_skip: Option<u32>,
    /// Output frame rate.
    #[arg(long)]
    fps: Option<u32>,
    /// Write the multipart MJPEG stream to this file.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Probe camera indices 0..5 and exit.
    #[arg(long)]
    list_cameras: bool,
    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = &args.config {
        std::env::set_var("EDGECAM_CONFIG", path);
    }
    if let Some(preset) = args.preset {
        std::env::set_var("EDGECAM_PRESET", preset.key());
    }
    let mut cfg = AppConfig::load()?;
    apply_args(&mut cfg, &args)?;

    let mut driver = build_driver(args.driver)?;
    if args.list_cameras {
        let found = probe::enumerate_indices(driver.as_mut());
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    let detector_settings = cfg.resolved_detector()?;
    let detector = build_backend(&detector_settings)?;
    log::info!(
        "firewatch {} starting: source {}, {} @ {} fps, frame skip {}, detector {:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.source,
        cfg.pipeline.resolution,
        cfg.pipeline.target_fps,
        cfg.pipeline.frame_skip,
        detector_settings.kind
    );

    let mut pipeline = Pipeline::start(
        cfg.pipeline.clone(),
        cfg.source.clone(),
        driver,
        detector,
        Arc::new(JpegEncoder),
    )?;
    let handle = pipeline.handle();

    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || ctrlc_handle.stop()).context("error setting Ctrl-C handler")?;

    let mut sink = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_stats = Instant::now();
    pipeline.run(|output| {
        if let Some(out) = sink.as_mut() {
            stream::write_part(out, output)?;
        }
        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            log::info!("stats: {}", serde_json::to_string(&handle.stats())?);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            handle.stop();
        }
        Ok(())
    })?;

    if let Some(mut out) = sink {
        out.flush()?;
    }
    log::info!("final stats: {}", serde_json::to_string(&handle.stats())?);
    Ok(())
}

fn apply_args(cfg: &mut AppConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source = source.parse().unwrap_or_default();
    }
    if let Some(kind) = args.detector {
        cfg.detector.kind = kind;
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
    }
    if let Some(skip) = args.frame_skip {
        cfg.pipeline.frame_skip = skip;
    }
    if let Some(fps) = args.fps {
        cfg.pipeline.target_fps = fps;
    }
    cfg.validate()
}

fn build_driver(choice: Option<DriverArg>) -> Result<Box<dyn CaptureDriver>> {
    let choice = choice.unwrap_or(if cfg!(feature = "ingest-v4l2") {
        DriverArg::V4l2
    } else {
        DriverArg::Synthetic
    });
    match choice {
        DriverArg::Synthetic => Ok(Box::new(SyntheticDriver::default())),
        DriverArg::V4l2 => v4l2_driver(),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn v4l2_driver() -> Result<Box<dyn CaptureDriver>> {
    Ok(Box::new(firewatch_edge::ingest::V4l2Driver::new()))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn v4l2_driver() -> Result<Box<dyn CaptureDriver>> {
    Err(anyhow::anyhow!(
        "v4l2 capture requires the ingest-v4l2 feature"
    ))
}
