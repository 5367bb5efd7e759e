//! Classify grid cells into palette indices.

use rayon::prelude::*;
use sat_common::Grid;

use crate::style::ThresholdLadder;

/// Grids with fewer cells than this are classified on the calling thread.
const PARALLEL_THRESHOLD: usize = 4096;

/// Palette indices for a grid, north-first, each cell drawn as a
/// `scale × scale` block.
///
/// Returns `(indices, width, height)`.
pub fn classify_grid(grid: &Grid, ladder: &ThresholdLadder, scale: usize) -> (Vec<u8>, usize, usize) {
    let scale = scale.max(1);
    let width = grid.cols() * scale;
    let height = grid.rows() * scale;
    let mut indices = vec![0u8; width * height];
    if width == 0 || height == 0 {
        return (indices, width, height);
    }

    let rows: Vec<&[f64]> = grid.north_first_rows().collect();
    let paint = |(band_row, block): (usize, &mut [u8])| {
        let source = rows[band_row];
        let (first, rest) = block.split_at_mut(width);
        for (x, px) in first.iter_mut().enumerate() {
            *px = ladder.classify(source[x / scale]);
        }
        for line in rest.chunks_exact_mut(width) {
            line.copy_from_slice(first);
        }
    };

    if grid.values().len() >= PARALLEL_THRESHOLD {
        indices
            .par_chunks_mut(width * scale)
            .enumerate()
            .for_each(paint);
    } else {
        indices.chunks_mut(width * scale).enumerate().for_each(paint);
    }

    (indices, width, height)
}
