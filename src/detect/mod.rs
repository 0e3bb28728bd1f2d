mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{build_backend, BackendKind, DetectorSettings};
pub use result::{BoundingBox, DangerLabels, Detection, DetectionResult};
