//! Image rendering for precipitation grids.
//!
//! - Threshold ladders and colour schemes ([`style`])
//! - Grid classification into palette indices ([`raster`])
//! - Indexed PNG encoding ([`png`])
//! - Looping GIF animations from rendered frames ([`animation`])
//!
//! The pipeline only talks to the [`Renderer`] trait; [`RasterRenderer`] is
//! the implementation shipped with the extractor.

pub mod animation;
pub mod png;
pub mod raster;
pub mod style;

use std::path::{Path, PathBuf};

use sat_common::{BoundingBox, Grid};
use thiserror::Error;
use tracing::debug;

pub use style::{Color, ColorScheme, ThresholdLadder};

/// Errors raised while rendering images or animations.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Grid has no cells to render")]
    EmptyGrid,

    #[error("Invalid threshold ladder: {0}")]
    InvalidLadder(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("No frames to animate")]
    NoFrames,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Consumer of finished grids and rendered frame sequences.
pub trait Renderer: Send + Sync {
    /// Render one grid to an image file at `output`.
    fn render_grid(
        &self,
        grid: &Grid,
        bbox: &BoundingBox,
        title: &str,
        ladder: &ThresholdLadder,
        scheme: ColorScheme,
        output: &Path,
    ) -> Result<(), RenderError>;

    /// Combine image files, in the given order, into an animation at `output`.
    fn render_animation(&self, frames: &[PathBuf], output: &Path) -> Result<(), RenderError>;
}

/// Renders grids as blocky palette PNGs and sequences as GIFs.
#[derive(Debug, Clone)]
pub struct RasterRenderer {
    /// Pixels per grid cell along each axis.
    pub scale: usize,
    /// Delay between animation frames.
    pub frame_delay_ms: u32,
}

impl Default for RasterRenderer {
    fn default() -> Self {
        Self {
            scale: 8,
            frame_delay_ms: 500,
        }
    }
}

impl RasterRenderer {
    /// Encode a grid to PNG bytes without touching the filesystem.
    pub fn encode_grid(
        &self,
        grid: &Grid,
        bbox: &BoundingBox,
        title: &str,
        ladder: &ThresholdLadder,
        scheme: ColorScheme,
    ) -> Result<Vec<u8>, RenderError> {
        if grid.is_empty() {
            return Err(RenderError::EmptyGrid);
        }

        let (indices, width, height) = raster::classify_grid(grid, ladder, self.scale);
        let palette: Vec<(u8, u8, u8, u8)> = scheme.palette(ladder).iter().map(Color::as_tuple).collect();
        let extent = bbox.to_string();
        let levels = ladder
            .levels()
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        png::create_png_indexed(
            width,
            height,
            &palette,
            &indices,
            &[("Title", title), ("BoundingBox", &extent), ("Levels", &levels)],
        )
    }
}

impl Renderer for RasterRenderer {
    fn render_grid(
        &self,
        grid: &Grid,
        bbox: &BoundingBox,
        title: &str,
        ladder: &ThresholdLadder,
        scheme: ColorScheme,
        output: &Path,
    ) -> Result<(), RenderError> {
        let bytes = self.encode_grid(grid, bbox, title, ladder, scheme)?;
        std::fs::write(output, &bytes)?;
        debug!(path = %output.display(), bytes = bytes.len(), "Rendered grid");
        Ok(())
    }

    fn render_animation(&self, frames: &[PathBuf], output: &Path) -> Result<(), RenderError> {
        let written = animation::write_gif(frames, output, self.frame_delay_ms)?;
        debug!(path = %output.display(), frames = written, "Rendered animation");
        Ok(())
    }
}
