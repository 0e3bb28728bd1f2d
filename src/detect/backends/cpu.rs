use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, PixelLayout};

/// Side of the square cells the frame is scored in, in pixels.
const CELL: usize = 16;
/// Share of flame-coloured pixels for a cell to count as burning.
const CELL_RATIO: f32 = 0.5;
/// Smallest region, in cells, that is reported.
const MIN_REGION_CELLS: usize = 1;

/// CPU backend for flame detection by colour.
///
/// Scores the frame in `CELL`-sized cells by the share of bright, red-dominant
/// pixels, then joins neighbouring hot cells into one `fire` detection each.
/// Confidence is the mean flame share over the region's cells. A cheap
/// stand-in when no model is deployed; it does not detect smoke.
#[derive(Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

fn is_flame(r: u8, g: u8, b: u8) -> bool {
    r >= 180 && g >= 60 && b < 120 && r > g && g > b
}

fn rgb_at(pixels: &[u8], layout: PixelLayout, idx: usize) -> (u8, u8, u8) {
    match layout {
        PixelLayout::Rgb8 => (pixels[idx * 3], pixels[idx * 3 + 1], pixels[idx * 3 + 2]),
        PixelLayout::Bgr8 => (pixels[idx * 3 + 2], pixels[idx * 3 + 1], pixels[idx * 3]),
        PixelLayout::Gray8 => (pixels[idx], pixels[idx], pixels[idx]),
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        if frame.pixels().len() != frame.expected_len() {
            return Err(anyhow!(
                "expected {} bytes for {} frame, received {}",
                frame.expected_len(),
                frame.size(),
                frame.pixels().len()
            ));
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let (cols, rows) = (w.div_ceil(CELL), h.div_ceil(CELL));
        let mut ratios = vec![0f32; cols * rows];

        for cy in 0..rows {
            for cx in 0..cols {
                let (x0, y0) = (cx * CELL, cy * CELL);
                let (x1, y1) = ((x0 + CELL).min(w), (y0 + CELL).min(h));
                let mut hot = 0usize;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let (r, g, b) = rgb_at(frame.pixels(), frame.layout, y * w + x);
                        if is_flame(r, g, b) {
                            hot += 1;
                        }
                    }
                }
                ratios[cy * cols + cx] = hot as f32 / ((x1 - x0) * (y1 - y0)) as f32;
            }
        }

        // Flood-fill neighbouring hot cells into regions.
        let mut seen = vec![false; cols * rows];
        let mut detections = Vec::new();
        for start in 0..cols * rows {
            if seen[start] || ratios[start] < CELL_RATIO {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);
            let (mut cells, mut ratio_sum) = (0usize, 0f32);
            while let Some(cell) = stack.pop() {
                let (cx, cy) = (cell % cols, cell / cols);
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);
                cells += 1;
                ratio_sum += ratios[cell];

                let mut neighbours = Vec::with_capacity(4);
                if cx > 0 {
                    neighbours.push(cell - 1);
                }
                if cx + 1 < cols {
                    neighbours.push(cell + 1);
                }
                if cy > 0 {
                    neighbours.push(cell - cols);
                }
                if cy + 1 < rows {
                    neighbours.push(cell + cols);
                }
                for n in neighbours {
                    if !seen[n] && ratios[n] >= CELL_RATIO {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }

            let confidence = ratio_sum / cells as f32;
            if cells < MIN_REGION_CELLS || confidence < confidence_threshold {
                continue;
            }
            detections.push(Detection {
                label: "fire".to_string(),
                confidence,
                bbox: BoundingBox {
                    x1: (min_x * CELL) as f32,
                    y1: (min_y * CELL) as f32,
                    x2: ((max_x + 1) * CELL).min(w) as f32,
                    y2: ((max_y + 1) * CELL).min(h) as f32,
                },
            });
        }

        Ok(detections)
    }
}
