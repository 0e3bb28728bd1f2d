//! Camera enumeration.

use serde::Serialize;

use crate::ingest::{CaptureBackend, CaptureDriver, SourceId};

/// Device indices probed when no candidates are given.
pub const DEFAULT_PROBE_RANGE: std::ops::Range<u32> = 0..5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbedSource {
    pub source: SourceId,
    pub width: u32,
    pub height: u32,
}

/// Open, read one frame from and release each candidate; report the ones
/// that delivered a frame.
pub fn enumerate_sources(
    driver: &mut dyn CaptureDriver,
    candidates: impl IntoIterator<Item = SourceId>,
) -> Vec<ProbedSource> {
    let mut found = Vec::new();
    for source in candidates {
        let mut handle = match driver.open(&source, CaptureBackend::Any) {
            Ok(handle) if handle.is_opened() => handle,
            Ok(mut handle) => {
                handle.release();
                continue;
            }
            Err(err) => {
                log::debug!("probe: {} unavailable: {:#}", source, err);
                continue;
            }
        };
        match handle.read() {
            Ok(Some(image)) => {
                log::info!("probe: found camera {} ({}x{})", source, image.width, image.height);
                found.push(ProbedSource {
                    source,
                    width: image.width,
                    height: image.height,
                });
            }
            Ok(None) => log::debug!("probe: {} opened but returned no frame", source),
            Err(err) => log::debug!("probe: reading {} failed: {:#}", source, err),
        }
        handle.release();
    }
    found
}

/// `enumerate_sources` over `DEFAULT_PROBE_RANGE`.
pub fn enumerate_indices(driver: &mut dyn CaptureDriver) -> Vec<ProbedSource> {
    enumerate_sources(driver, DEFAULT_PROBE_RANGE.map(SourceId::Index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SyntheticConfig, SyntheticDriver};

    #[test]
    fn reports_only_sources_that_deliver_frames() {
        let mut driver = SyntheticDriver::new(SyntheticConfig {
            available: vec![SourceId::Index(0), SourceId::Index(3)],
            width: 32,
            height: 24,
            ..SyntheticConfig::default()
        });
        let found = enumerate_indices(&mut driver);
        let ids: Vec<SourceId> = found.iter().map(|p| p.source.clone()).collect();
        assert_eq!(ids, vec![SourceId::Index(0), SourceId::Index(3)]);
        assert_eq!((found[0].width, found[0].height), (32, 24));
    }
}
