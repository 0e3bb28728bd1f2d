//! Draws detection boxes onto a copy of the frame.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{DangerLabels, Detection};
use crate::encode::to_rgb_image;
use crate::error::EncodeError;
use crate::frame::{Frame, PixelLayout};

const LINE_WIDTH: i32 = 3;
const DANGER_COLOR: Rgb<u8> = Rgb([255, 40, 40]);
const OTHER_COLOR: Rgb<u8> = Rgb([40, 220, 40]);

/// RGB frame with one box per detection. Danger labels are drawn in red.
pub fn annotate(
    frame: &Frame,
    detections: &[Detection],
    danger_labels: &DangerLabels,
) -> Result<Frame, EncodeError> {
    let mut image = to_rgb_image(frame)?;
    draw_detections(&mut image, detections, danger_labels);

    Ok(Frame::new(
        image.into_raw(),
        frame.width,
        frame.height,
        PixelLayout::Rgb8,
        frame.id,
    ))
}

fn draw_detections(image: &mut RgbImage, detections: &[Detection], danger_labels: &DangerLabels) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
        return;
    }

    for detection in detections {
        let color = if danger_labels.contains(&detection.label) {
            DANGER_COLOR
        } else {
            OTHER_COLOR
        };
        let bbox = &detection.bbox;
        let x1 = (bbox.x1.round() as i32).clamp(0, w - 1);
        let y1 = (bbox.y1.round() as i32).clamp(0, h - 1);
        let x2 = (bbox.x2.round() as i32).clamp(0, w - 1);
        let y2 = (bbox.y2.round() as i32).clamp(0, h - 1);

        for inset in 0..LINE_WIDTH {
            let width = x2 - x1 - 2 * inset;
            let height = y2 - y1 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}
