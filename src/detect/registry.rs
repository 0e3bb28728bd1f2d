use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::backend::DetectorBackend;
use super::backends::{CpuBackend, StubBackend};

/// Detector backends that can be selected by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Stub,
    Cpu,
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "cpu" => Ok(BackendKind::Cpu),
            "tract" | "onnx" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

/// How to build the detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub kind: BackendKind,
    /// Resolved model file, required by model-based backends.
    pub model_path: Option<PathBuf>,
    /// Square model input side, in pixels.
    pub input_size: u32,
    /// Class names, indexed by model class id.
    pub labels: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Cpu,
            model_path: None,
            input_size: 640,
            labels: vec!["fire".to_string(), "smoke".to_string()],
        }
    }
}

/// Build the configured backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend: Box<dyn DetectorBackend> = match settings.kind {
        BackendKind::Stub => Box::new(StubBackend::new()),
        BackendKind::Cpu => Box::new(CpuBackend::new()),
        BackendKind::Tract => build_tract(settings)?,
    };
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend needs a model path"))?;
    Ok(Box::new(super::backends::TractBackend::new(
        path,
        settings.input_size,
        settings.labels.clone(),
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
