//! Rolling daily animations and post-run cleanup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use renderer::Renderer;
use sat_common::time::{floor_to_hour, is_midnight, DATE_FORMAT};
use sat_common::SatError;
use tracing::{debug, info, warn};

use crate::accumulator::is_nonempty_file;
use crate::cache::ARCHIVE_EXTENSION;

/// Per-hour images are `<prefix>_<stamp>.asc.png`.
const IMAGE_SUFFIX: &str = ".asc.png";

/// Result of one composite rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeOutcome {
    Written { path: PathBuf, frames: usize },
    /// No per-hour images for that day.
    NoFrames,
    /// Yesterday's composite exists and the run does not start at midnight.
    Kept,
}

#[derive(Debug)]
pub struct CompositeReport {
    pub today: Result<CompositeOutcome, SatError>,
    pub yesterday: Result<CompositeOutcome, SatError>,
}

impl CompositeReport {
    pub fn errors(&self) -> impl Iterator<Item = &SatError> {
        [&self.today, &self.yesterday]
            .into_iter()
            .filter_map(|r| r.as_ref().err())
    }
}

/// What cleanup removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub tmp_dir_removed: bool,
    pub archives_removed: usize,
}

/// Maintains the today/yesterday animations in an output directory.
pub struct ArtifactLifecycleManager<'a> {
    output_dir: &'a Path,
    prefix: &'a str,
    renderer: &'a dyn Renderer,
}

impl<'a> ArtifactLifecycleManager<'a> {
    pub fn new(output_dir: &'a Path, prefix: &'a str, renderer: &'a dyn Renderer) -> Self {
        Self {
            output_dir,
            prefix,
            renderer,
        }
    }

    pub fn today_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_today.gif", self.prefix))
    }

    pub fn yesterday_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_yesterday.gif", self.prefix))
    }

    /// Per-hour images of `date`, ordered by file name.
    pub fn daily_frames(&self, date: NaiveDate) -> Result<Vec<PathBuf>, SatError> {
        let stem = format!("{}_{}", self.prefix, date.format(DATE_FORMAT));
        let entries = std::fs::read_dir(self.output_dir).map_err(|e| SatError::cache_io(self.output_dir, e))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |name| name.starts_with(&stem) && name.ends_with(IMAGE_SUFFIX))
            })
            .collect();
        frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(frames)
    }

    /// Rebuild today's composite and, when due, yesterday's.
    ///
    /// "Today" is the date of the run's floored start. Yesterday is rebuilt
    /// when its file is missing or empty, or when the run starts at 00:00.
    pub fn update_composites(&self, run_start: DateTime<Utc>) -> CompositeReport {
        let start = floor_to_hour(run_start);
        let today = start.date_naive();

        let today_result = self.build_composite(today, &self.today_path());

        let yesterday_path = self.yesterday_path();
        let yesterday_result = if !is_nonempty_file(&yesterday_path) || is_midnight(start) {
            self.build_composite(today - Duration::days(1), &yesterday_path)
        } else {
            debug!(path = %yesterday_path.display(), "Keeping yesterday's composite");
            Ok(CompositeOutcome::Kept)
        };

        CompositeReport {
            today: today_result,
            yesterday: yesterday_result,
        }
    }

    fn build_composite(&self, date: NaiveDate, output: &Path) -> Result<CompositeOutcome, SatError> {
        let frames = self.daily_frames(date)?;
        if frames.is_empty() {
            info!(date = %date, "No images for composite; skipping");
            return Ok(CompositeOutcome::NoFrames);
        }
        self.renderer
            .render_animation(&frames, output)
            .map_err(|e| SatError::render(output, e))?;
        info!(path = %output.display(), frames = frames.len(), "Wrote composite");
        Ok(CompositeOutcome::Written {
            path: output.to_path_buf(),
            frames: frames.len(),
        })
    }

    /// Remove the working directory and every archive in the output directory.
    ///
    /// Failures are logged, never returned.
    pub fn cleanup(&self, tmp_dir: &Path) -> CleanupReport {
        let mut report = CleanupReport::default();

        match std::fs::remove_dir_all(tmp_dir) {
            Ok(()) => report.tmp_dir_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp_dir.display(), error = %e, "Failed to remove temp dir"),
        }

        match std::fs::read_dir(self.output_dir) {
            Ok(entries) => {
                for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
                    if path.extension().map_or(false, |ext| ext == ARCHIVE_EXTENSION) {
                        match std::fs::remove_file(&path) {
                            Ok(()) => report.archives_removed += 1,
                            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete archive"),
                        }
                    }
                }
            }
            Err(e) => warn!(path = %self.output_dir.display(), error = %e, "Failed to list output dir"),
        }

        info!(
            tmp_dir_removed = report.tmp_dir_removed,
            archives_removed = report.archives_removed,
            "Cleanup complete"
        );
        report
    }
}
