use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::capture::CaptureSettings;
use crate::detect::{BackendKind, DangerLabels, DetectorSettings};
use crate::frame::FrameSize;
use crate::ingest::SourceId;

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_FRAME_SKIP: u32 = 3;
const DEFAULT_CONFIDENCE: f32 = 0.15;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_RECONNECT_THRESHOLD: u32 = 10;
const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
const DEFAULT_INFERENCE_WAIT_MS: u64 = 1000;
const DEFAULT_MODEL_DIR: &str = "models";
/// Tried last, in order, when neither the requested model nor any sized model exists.
const FALLBACK_MODELS: [&str; 2] = ["fire_m.onnx", "yolov8n.onnx"];

// ----------------------------------------------------------------------------
// PipelineConfig
// ----------------------------------------------------------------------------

/// Runtime tunables of one pipeline. Replaced wholesale, never mutated in place
/// while a pipeline holds it.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub resolution: FrameSize,
    pub target_fps: u32,
    /// Infer on every N-th captured frame.
    pub frame_skip: u32,
    pub confidence: f32,
    pub jpeg_quality: u8,
    pub reconnect_threshold: u32,
    pub danger_labels: DangerLabels,
    /// Pause between releasing a handle and opening the next one.
    pub settle_delay: Duration,
    /// How long the inference worker waits for a frame before re-checking
    /// the running flag.
    pub inference_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: FrameSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            target_fps: DEFAULT_TARGET_FPS,
            frame_skip: DEFAULT_FRAME_SKIP,
            confidence: DEFAULT_CONFIDENCE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            reconnect_threshold: DEFAULT_RECONNECT_THRESHOLD,
            danger_labels: DangerLabels::default(),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            inference_wait: Duration::from_millis(DEFAULT_INFERENCE_WAIT_MS),
        }
    }
}

impl PipelineConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            resolution: self.resolution,
            target_fps: self.target_fps,
            settle_delay: self.settle_delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.is_empty() {
            return Err(anyhow!("resolution must be non-zero, got {}", self.resolution));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.reconnect_threshold == 0 {
            return Err(anyhow!("reconnect_threshold must be at least 1"));
        }
        if self.inference_wait.is_zero() {
            return Err(anyhow!("inference_wait must be greater than zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Device presets
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Nano,
    Small,
    Medium,
}

impl ModelSize {
    pub const ALL: [ModelSize; 3] = [ModelSize::Nano, ModelSize::Small, ModelSize::Medium];

    pub fn file_name(self) -> &'static str {
        match self {
            ModelSize::Nano => "yolov8n.onnx",
            ModelSize::Small => "yolov8s.onnx",
            ModelSize::Medium => "fire_m.onnx",
        }
    }
}

impl FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nano" | "n" => Ok(ModelSize::Nano),
            "small" | "s" => Ok(ModelSize::Small),
            "medium" | "m" => Ok(ModelSize::Medium),
            other => Err(anyhow!("unknown model size '{}'", other)),
        }
    }
}

/// Known deployment targets. Picking one from the hardware is left to the
/// operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicePreset {
    RaspberryPi,
    JetsonNano,
    JetsonXavier,
    HiSilicon,
    Rockchip,
    X86Low,
    X86High,
    Auto,
}

impl DevicePreset {
    pub const ALL: [DevicePreset; 8] = [
        DevicePreset::RaspberryPi,
        DevicePreset::JetsonNano,
        DevicePreset::JetsonXavier,
        DevicePreset::HiSilicon,
        DevicePreset::Rockchip,
        DevicePreset::X86Low,
        DevicePreset::X86High,
        DevicePreset::Auto,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DevicePreset::RaspberryPi => "raspberry_pi",
            DevicePreset::JetsonNano => "jetson_nano",
            DevicePreset::JetsonXavier => "jetson_xavier",
            DevicePreset::HiSilicon => "hisilicon",
            DevicePreset::Rockchip => "rockchip",
            DevicePreset::X86Low => "x86_low",
            DevicePreset::X86High => "x86_high",
            DevicePreset::Auto => "auto",
        }
    }

    pub fn model_size(self) -> ModelSize {
        match self {
            DevicePreset::JetsonXavier | DevicePreset::X86High => ModelSize::Medium,
            _ => ModelSize::Nano,
        }
    }

    /// Pipeline defaults for this device class.
    pub fn pipeline_config(self) -> PipelineConfig {
        // (width, height, fps, frame_skip, jpeg_quality, confidence)
        let (width, height, target_fps, frame_skip, jpeg_quality, confidence) = match self {
            DevicePreset::RaspberryPi => (640, 480, 10, 5, 70, 0.2),
            DevicePreset::JetsonNano => (1280, 720, 20, 2, 80, 0.15),
            DevicePreset::JetsonXavier => (1920, 1080, 30, 1, 85, 0.15),
            DevicePreset::HiSilicon | DevicePreset::Rockchip => (1280, 720, 15, 3, 75, 0.18),
            DevicePreset::X86Low | DevicePreset::Auto => (1280, 720, 20, 3, 80, 0.15),
            DevicePreset::X86High => (1920, 1080, 30, 1, 85, 0.15),
        };
        PipelineConfig {
            resolution: FrameSize::new(width, height),
            target_fps,
            frame_skip,
            jpeg_quality,
            confidence,
            ..PipelineConfig::default()
        }
    }
}

impl fmt::Display for DevicePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DevicePreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        DevicePreset::ALL
            .into_iter()
            .find(|preset| preset.key() == wanted)
            .ok_or_else(|| anyhow!("unknown device preset '{}'", s.trim()))
    }
}

// ----------------------------------------------------------------------------
// AppConfig: preset -> file -> env
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    preset: Option<String>,
    source: Option<SourceId>,
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    frame_skip: Option<u32>,
    confidence: Option<f32>,
    jpeg_quality: Option<u8>,
    reconnect_threshold: Option<u32>,
    danger_labels: Option<Vec<String>>,
    settle_delay_ms: Option<u64>,
    inference_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    model_size: Option<ModelSize>,
    input_size: Option<u32>,
    labels: Option<Vec<String>>,
}

/// Everything the `firewatch` binary needs to build a pipeline.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub preset: Option<DevicePreset>,
    pub source: SourceId,
    pub pipeline: PipelineConfig,
    pub detector: DetectorSettings,
    pub model_size: ModelSize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preset: None,
            source: SourceId::default(),
            pipeline: PipelineConfig::default(),
            detector: DetectorSettings::default(),
            model_size: ModelSize::Nano,
        }
    }
}

impl AppConfig {
    /// Built-in defaults, or the `EDGECAM_PRESET` preset, overlaid with the
    /// file named by `EDGECAM_CONFIG` and then `EDGECAM_*` variables.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("EDGECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let file_cfg = file_cfg.unwrap_or_default();

        let preset_name = non_empty_env("EDGECAM_PRESET").or_else(|| file_cfg.preset.clone());
        let preset = preset_name
            .as_deref()
            .map(DevicePreset::from_str)
            .transpose()?;

        let mut cfg = Self::from_preset(preset);
        cfg.apply_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_preset(preset: Option<DevicePreset>) -> Self {
        match preset {
            Some(preset) => Self {
                preset: Some(preset),
                pipeline: preset.pipeline_config(),
                model_size: preset.model_size(),
                ..Self::default()
            },
            None => Self::default(),
        }
    }

    fn apply_file(&mut self, file: AppConfigFile) {
        if let Some(source) = file.source {
            self.source = source;
        }
        if let Some(p) = file.pipeline {
            let pipeline = &mut self.pipeline;
            if let Some(width) = p.width {
                pipeline.resolution.width = width;
            }
            if let Some(height) = p.height {
                pipeline.resolution.height = height;
            }
            pipeline.target_fps = p.target_fps.unwrap_or(pipeline.target_fps);
            pipeline.frame_skip = p.frame_skip.unwrap_or(pipeline.frame_skip);
            pipeline.confidence = p.confidence.unwrap_or(pipeline.confidence);
            pipeline.jpeg_quality = p.jpeg_quality.unwrap_or(pipeline.jpeg_quality);
            pipeline.reconnect_threshold = p
                .reconnect_threshold
                .unwrap_or(pipeline.reconnect_threshold);
            if let Some(labels) = p.danger_labels {
                pipeline.danger_labels = DangerLabels::new(labels);
            }
            if let Some(ms) = p.settle_delay_ms {
                pipeline.settle_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = p.inference_wait_ms {
                pipeline.inference_wait = Duration::from_millis(ms);
            }
        }
        if let Some(d) = file.detector {
            if let Some(kind) = d.backend {
                self.detector.kind = kind;
            }
            if d.model_path.is_some() {
                self.detector.model_path = d.model_path;
            }
            self.model_size = d.model_size.unwrap_or(self.model_size);
            self.detector.input_size = d.input_size.unwrap_or(self.detector.input_size);
            if let Some(labels) = d.labels {
                self.detector.labels = labels;
            }
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("EDGECAM_SOURCE") {
            self.source = source.parse().unwrap_or_default();
        }
        if let Some(fps) = non_empty_env("EDGECAM_TARGET_FPS") {
            self.pipeline.target_fps = parse_env("EDGECAM_TARGET_FPS", &fps)?;
        }
        if let Some(skip) = non_empty_env("EDGECAM_FRAME_SKIP") {
            self.pipeline.frame_skip = parse_env("EDGECAM_FRAME_SKIP", &skip)?;
        }
        if let Some(conf) = non_empty_env("EDGECAM_CONFIDENCE") {
            self.pipeline.confidence = parse_env("EDGECAM_CONFIDENCE", &conf)?;
        }
        if let Some(quality) = non_empty_env("EDGECAM_JPEG_QUALITY") {
            self.pipeline.jpeg_quality = parse_env("EDGECAM_JPEG_QUALITY", &quality)?;
        }
        if let Some(threshold) = non_empty_env("EDGECAM_RECONNECT_THRESHOLD") {
            self.pipeline.reconnect_threshold =
                parse_env("EDGECAM_RECONNECT_THRESHOLD", &threshold)?;
        }
        if let Some(detector) = non_empty_env("EDGECAM_DETECTOR") {
            self.detector.kind = detector.parse()?;
        }
        if let Some(path) = non_empty_env("EDGECAM_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Ok(labels) = std::env::var("EDGECAM_DANGER_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.pipeline.danger_labels = DangerLabels::new(parsed);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        Ok(())
    }

    /// Detector settings with the model file resolved for model-based
    /// backends.
    pub fn resolved_detector(&self) -> Result<DetectorSettings> {
        let mut settings = self.detector.clone();
        if settings.kind == BackendKind::Tract {
            let path = resolve_model_path(
                settings.model_path.as_deref(),
                self.model_size,
                &default_search_dirs(),
            )?;
            log::info!("using model {}", path.display());
            settings.model_path = Some(path);
        }
        Ok(settings)
    }
}

// ----------------------------------------------------------------------------
// Model path resolution
// ----------------------------------------------------------------------------

/// `models/`, the working directory, then the directory of the executable.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(DEFAULT_MODEL_DIR), PathBuf::from(".")];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join(DEFAULT_MODEL_DIR));
        dirs.push(exe_dir);
    }
    dirs
}

/// Candidate model files in lookup order. An explicit path is tried as given
/// first, then by file name in each search directory.
pub fn model_candidates(
    requested: Option<&Path>,
    size: ModelSize,
    search_dirs: &[PathBuf],
) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    let mut push = |path: PathBuf| {
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    };

    let wanted_name = match requested {
        Some(path) => {
            push(path.to_path_buf());
            path.file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(size.file_name()))
        }
        None => PathBuf::from(size.file_name()),
    };
    for dir in search_dirs {
        push(dir.join(&wanted_name));
    }
    for other in ModelSize::ALL.into_iter().filter(|s| *s != size) {
        for dir in search_dirs {
            push(dir.join(other.file_name()));
        }
    }
    for fallback in FALLBACK_MODELS {
        push(PathBuf::from(fallback));
    }
    candidates
}

/// First existing candidate from `model_candidates`.
pub fn resolve_model_path(
    requested: Option<&Path>,
    size: ModelSize,
    search_dirs: &[PathBuf],
) -> Result<PathBuf> {
    let candidates = model_candidates(requested, size, search_dirs);
    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        if requested.is_some_and(|wanted| wanted != found.as_path()) {
            log::warn!(
                "requested model not found, falling back to {}",
                found.display()
            );
        }
        return Ok(found.clone());
    }
    let searched: Vec<String> = candidates
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    Err(anyhow!(
        "no detection model found; searched: {}",
        searched.join(", ")
    ))
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value.trim()))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
