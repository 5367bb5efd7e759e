//! Window totals from archived hourly grids.

use std::path::{Path, PathBuf};

use renderer::{ColorScheme, Renderer, ThresholdLadder};
use sat_common::{BoundingBox, Grid, SatError, TimeWindow};
use tracing::{info, warn};

use crate::cache::{ArchiveCache, ArchiveKey};
use crate::metrics;

/// What [`Accumulator::accumulate`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulateOutcome {
    Written(PathBuf),
    /// The cumulative image was already on disk.
    AlreadyExists(PathBuf),
    /// Some hours have no archive yet; a later run can complete the total.
    Incomplete { missing: Vec<String> },
}

/// `<output_dir>/<prefix>_cum_rf_<start>-<end>.png`
pub fn cumulative_path(output_dir: &Path, prefix: &str, window: &TimeWindow) -> PathBuf {
    output_dir.join(format!("{}_cum_rf_{}.png", prefix, window.stamp()))
}

pub fn cumulative_title(window: &TimeWindow) -> String {
    format!("Cumulative rainfall {}", window.stamp())
}

/// Element-wise sum of grids that share shape and axes.
pub fn sum_grids<'a>(grids: impl IntoIterator<Item = &'a Grid>, context: &str) -> Result<Option<Grid>, SatError> {
    let mut total: Option<Grid> = None;
    for grid in grids {
        match total.as_mut() {
            None => total = Some(grid.clone()),
            Some(acc) => acc.accumulate(grid, context)?,
        }
    }
    Ok(total)
}

/// Sums a window's hourly archives and renders the total.
pub struct Accumulator<'a> {
    cache: &'a ArchiveCache,
    renderer: &'a dyn Renderer,
    prefix: &'a str,
    bbox: BoundingBox,
    force: bool,
}

impl<'a> Accumulator<'a> {
    pub fn new(cache: &'a ArchiveCache, renderer: &'a dyn Renderer, prefix: &'a str, bbox: BoundingBox) -> Self {
        Self {
            cache,
            renderer,
            prefix,
            bbox,
            force: false,
        }
    }

    /// Recompute even when the cumulative image is already on disk.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Build the cumulative image for `window` unless it already exists
    /// (and `force` is off).
    ///
    /// Shape or axis disagreement between hours is a `ShapeMismatch`, and no
    /// file is written in that case.
    pub fn accumulate(&self, window: &TimeWindow) -> Result<AccumulateOutcome, SatError> {
        let output = cumulative_path(self.cache.output_dir(), self.prefix, window);
        if !self.force && is_nonempty_file(&output) {
            info!(path = %output.display(), "Cumulative already exists");
            metrics::record_skipped("cumulative");
            return Ok(AccumulateOutcome::AlreadyExists(output));
        }

        let keys: Vec<ArchiveKey> = window
            .hours()
            .into_iter()
            .map(|instant| ArchiveKey::new(self.prefix, instant, self.bbox))
            .collect();

        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !self.cache.exists(key))
            .map(|key| sat_common::time::format_stamp(key.instant))
            .collect();
        if !missing.is_empty() || keys.is_empty() {
            warn!(
                window = %window.stamp(),
                missing = ?missing,
                "Window is incomplete; skipping cumulative"
            );
            metrics::record_cumulative("incomplete");
            return Ok(AccumulateOutcome::Incomplete { missing });
        }

        let grids = keys
            .iter()
            .map(|key| self.cache.read(key))
            .collect::<Result<Vec<_>, _>>()?;
        let context = format!("cumulative {}", window.stamp());
        let Some(total) = sum_grids(&grids, &context)? else {
            return Ok(AccumulateOutcome::Incomplete { missing });
        };

        self.renderer
            .render_grid(
                &total,
                &self.bbox,
                &cumulative_title(window),
                &ThresholdLadder::cumulative(),
                ColorScheme::Jet,
                &output,
            )
            .map_err(|e| SatError::render(&output, e))?;

        info!(path = %output.display(), hours = grids.len(), "Wrote cumulative");
        metrics::record_cumulative("written");
        Ok(AccumulateOutcome::Written(output))
    }
}

pub(crate) fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
