//! multipart/x-mixed-replace framing for emitted outputs.

use std::io::{self, Write};

use crate::frame::RenderedOutput;
use crate::pipeline::Pipeline;

pub const BOUNDARY: &str = "frame";

/// `Content-Type` header value for a stream of `format_part` chunks.
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

pub fn write_part<W: Write>(out: &mut W, output: &RenderedOutput) -> io::Result<()> {
    write!(out, "--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY)?;
    out.write_all(output.bytes())?;
    out.write_all(b"\r\n")
}

pub fn format_part(output: &RenderedOutput) -> Vec<u8> {
    let mut part = Vec::with_capacity(output.bytes().len() + 48);
    // Writing into a Vec cannot fail.
    let _ = write_part(&mut part, output);
    part
}

/// Yields one multipart chunk per emitted output until the pipeline stops.
pub struct MjpegStream<'a> {
    pipeline: &'a mut Pipeline,
}

impl<'a> MjpegStream<'a> {
    pub fn new(pipeline: &'a mut Pipeline) -> Self {
        Self { pipeline }
    }
}

impl Iterator for MjpegStream<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pipeline.is_running() {
            match self.pipeline.tick() {
                Some(output) => return Some(format_part(&output)),
                None => self.pipeline.idle(),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameId, OutputOrigin};

    #[test]
    fn part_framing() {
        let output = RenderedOutput::new(
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            FrameId::new(1, 2),
            false,
            OutputOrigin::Raw,
        );
        let part = format_part(&output);
        let mut expected = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(part, expected);
        assert_eq!(content_type(), "multipart/x-mixed-replace; boundary=frame");
    }
}
