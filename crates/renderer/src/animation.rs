//! Frame sequences to looping GIF animations.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use tracing::{debug, warn};

use crate::RenderError;

/// Encode `frames` (image files, in order) into an endlessly looping GIF.
///
/// The first frame fixes the canvas size; frames with other dimensions are
/// skipped with a warning. Returns the number of frames written.
pub fn write_gif(frames: &[PathBuf], output: &Path, frame_delay_ms: u32) -> Result<usize, RenderError> {
    if frames.is_empty() {
        return Err(RenderError::NoFrames);
    }

    let file = File::create(output)?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite)?;

    let mut canvas: Option<(u32, u32)> = None;
    let mut written = 0;

    for path in frames {
        let rgba = image::open(path)?.to_rgba8();
        let dims = rgba.dimensions();
        match canvas {
            None => canvas = Some(dims),
            Some(expected) if expected != dims => {
                warn!(
                    frame = %path.display(),
                    expected = ?expected,
                    actual = ?dims,
                    "Skipping frame with mismatched dimensions"
                );
                continue;
            }
            Some(_) => {}
        }

        let delay = Delay::from_numer_denom_ms(frame_delay_ms, 1);
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
        written += 1;
        debug!(frame = %path.display(), "Encoded animation frame");
    }

    Ok(written)
}
