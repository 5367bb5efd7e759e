//! One extraction run over a time window.
//!
//! Plan → fetch (bounded async fan-out) → build (rayon pool, join barrier)
//! → persist and render each hour → optional cumulative → composites →
//! optional cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use renderer::{ColorScheme, Renderer, ThresholdLadder};
use sat_common::time::format_stamp;
use sat_common::{BoundingBox, Grid, SatError, TimeWindow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::accumulator::{is_nonempty_file, AccumulateOutcome, Accumulator};
use crate::asc;
use crate::builder::GridBuilder;
use crate::cache::{ArchiveCache, ArchiveKey};
use crate::config::ExtractorConfig;
use crate::fetch::ParallelFetcher;
use crate::lifecycle::{ArtifactLifecycleManager, CleanupReport, CompositeReport};
use crate::metrics;
use crate::planner::{SourceLocator, TimeWindowPlanner};

/// Per-invocation parameters.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub window: TimeWindow,
    pub output_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub bbox: BoundingBox,
    /// Archive hourly grids and build the window total.
    pub cumulative: bool,
    /// Remove the temp dir and archives when done.
    pub clean: bool,
    /// Recompute hours even when their artifacts exist.
    pub rebuild: bool,
    /// Reference instant for choosing the remote product.
    pub now: DateTime<Utc>,
}

/// Grid built for one hour, or why it could not be.
#[derive(Debug)]
pub struct BuildOutcome {
    pub locator: SourceLocator,
    pub result: Result<Grid, SatError>,
}

/// Summary of a run. Fatal errors are returned instead.
#[derive(Debug, Default)]
pub struct RunReport {
    pub planned: usize,
    /// Hours whose artifacts were already on disk.
    pub skipped: Vec<DateTime<Utc>>,
    pub fetch_failures: Vec<(DateTime<Utc>, String)>,
    /// `.asc` files written by this run.
    pub written: Vec<PathBuf>,
    /// Artifact-branch failures (cache or render); siblings still completed.
    pub branch_failures: Vec<SatError>,
    pub cumulative: Option<AccumulateOutcome>,
    pub cleanup: Option<CleanupReport>,
    pub cancelled: bool,
}

impl RunReport {
    /// Exit status is zero only when nothing was cancelled or lost.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.branch_failures.is_empty()
    }

    fn absorb_composites(&mut self, composites: CompositeReport) {
        for result in [composites.today, composites.yesterday] {
            if let Err(e) = result {
                error!(error = %e, "Composite failed");
                self.branch_failures.push(e);
            }
        }
    }
}

/// Title drawn on hourly images.
pub fn hourly_title(instant: DateTime<Utc>) -> String {
    format!("Sat rf {} UTC", format_stamp(instant))
}

/// Runs windows against one configuration, fetcher and renderer.
pub struct Pipeline {
    config: ExtractorConfig,
    fetcher: ParallelFetcher,
    renderer: Arc<dyn Renderer>,
}

impl Pipeline {
    pub fn new(config: ExtractorConfig, fetcher: ParallelFetcher, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            config,
            fetcher,
            renderer,
        }
    }

    /// Pipeline with the scheme-dispatching fetcher for `config`.
    pub fn from_config(config: ExtractorConfig, renderer: Arc<dyn Renderer>) -> Result<Self, SatError> {
        config.validate()?;
        let fetcher = ParallelFetcher::from_config(&config)?;
        Ok(Self::new(config, fetcher, renderer))
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn prefix(&self) -> &str {
        &self.config.output.prefix
    }

    /// True when an hour needs no work.
    fn already_done(&self, locator: &SourceLocator, opts: &RunOptions, cache: &ArchiveCache) -> bool {
        if opts.rebuild || !is_nonempty_file(&locator.canonical_output_path) {
            return false;
        }
        !opts.cumulative || cache.exists(&ArchiveKey::new(self.prefix(), locator.instant, opts.bbox))
    }

    #[instrument(skip_all, fields(window = %opts.window.stamp(), bbox = %opts.bbox))]
    pub async fn run(&self, opts: &RunOptions, cancel: &CancellationToken) -> Result<RunReport, SatError> {
        opts.bbox.validate()?;
        self.config.validate()?;
        for dir in [&opts.output_dir, &opts.tmp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| SatError::cache_io(dir.as_path(), e))?;
        }

        let planner = TimeWindowPlanner::new(
            &opts.output_dir,
            &opts.tmp_dir,
            self.prefix(),
            self.config.source.clone(),
            self.config.near_realtime_threshold(),
        );
        let cache = ArchiveCache::new(&opts.output_dir);
        let locators = planner.plan(&opts.window, opts.now);

        let mut report = RunReport {
            planned: locators.len(),
            ..Default::default()
        };
        if locators.is_empty() {
            info!("Empty window; nothing to do");
        }

        let mut pending = Vec::with_capacity(locators.len());
        for locator in locators {
            if self.already_done(&locator, opts, &cache) {
                info!(path = %locator.canonical_output_path.display(), "Already exists; skipping");
                metrics::record_skipped("grid");
                report.skipped.push(locator.instant);
            } else {
                pending.push(locator);
            }
        }

        // fetch phase
        let fetched = if pending.is_empty() {
            Vec::new()
        } else {
            let fetch_report = self.fetcher.fetch_all(pending, cancel).await;
            for failure in fetch_report.failed {
                report
                    .fetch_failures
                    .push((failure.locator.instant, failure.error.to_string()));
            }
            fetch_report.succeeded
        };

        if cancel.is_cancelled() {
            warn!(fetched = fetched.len(), "Run cancelled; skipping build phase");
            report.cancelled = true;
            return Ok(report);
        }

        // build phase
        let outcomes = self.build_all(fetched, opts.bbox).await?;
        let mut grids = Vec::with_capacity(outcomes.len());
        let mut first_fatal = None;
        for outcome in outcomes {
            match outcome.result {
                Ok(grid) => grids.push((outcome.locator, grid)),
                Err(e) => {
                    error!(instant = %outcome.locator.stamp(), error = %e, "Build failed");
                    first_fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_fatal {
            return Err(e);
        }

        // persist + render each hour
        for persisted in self.persist_all(grids, opts).await? {
            if persisted.asc_written {
                report.written.push(persisted.asc_path);
            }
            report.branch_failures.extend(persisted.errors);
        }

        if opts.cumulative {
            match self.accumulate(opts).await {
                Ok(outcome) => report.cumulative = Some(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(error = %e, "Cumulative failed");
                    report.branch_failures.push(e);
                }
            }
        }

        let composites = {
            let renderer = Arc::clone(&self.renderer);
            let output_dir = opts.output_dir.clone();
            let prefix = self.prefix().to_string();
            let start = opts.window.start;
            tokio::task::spawn_blocking(move || {
                ArtifactLifecycleManager::new(&output_dir, &prefix, renderer.as_ref()).update_composites(start)
            })
            .await
            .map_err(|e| SatError::Worker(e.to_string()))?
        };
        report.absorb_composites(composites);

        if opts.clean {
            let manager = ArtifactLifecycleManager::new(&opts.output_dir, self.prefix(), self.renderer.as_ref());
            report.cleanup = Some(manager.cleanup(&opts.tmp_dir));
        }

        info!(
            planned = report.planned,
            skipped = report.skipped.len(),
            fetch_failures = report.fetch_failures.len(),
            written = report.written.len(),
            branch_failures = report.branch_failures.len(),
            "Run complete"
        );
        Ok(report)
    }

    /// Build every fetched payload on a rayon pool of `width` threads.
    async fn build_all(&self, fetched: Vec<SourceLocator>, bbox: BoundingBox) -> Result<Vec<BuildOutcome>, SatError> {
        if fetched.is_empty() {
            return Ok(Vec::new());
        }
        let width = self.fetcher.options().max_concurrent.max(1);
        let builder = GridBuilder::new(bbox);

        tokio::task::spawn_blocking(move || -> Result<Vec<BuildOutcome>, SatError> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(width)
                .build()
                .map_err(|e| SatError::Worker(e.to_string()))?;
            Ok(pool.install(|| {
                fetched
                    .into_par_iter()
                    .map(|locator| {
                        let result = builder.build(&locator.local_temp_path);
                        BuildOutcome { locator, result }
                    })
                    .collect()
            }))
        })
        .await
        .map_err(|e| SatError::Worker(e.to_string()))?
    }

    /// Write `.asc`, archive (with `cumulative`) and image for each hour.
    ///
    async fn persist_all(
        &self,
        grids: Vec<(SourceLocator, Grid)>,
        opts: &RunOptions,
    ) -> Result<Vec<Persisted>, SatError> {
        if grids.is_empty() {
            return Ok(Vec::new());
        }
        let width = self.fetcher.options().max_concurrent.max(1);
        let renderer = Arc::clone(&self.renderer);
        let cache = ArchiveCache::new(&opts.output_dir);
        let settings = PersistSettings {
            prefix: self.prefix().to_string(),
            bbox: opts.bbox,
            archive: opts.cumulative,
            rebuild: opts.rebuild,
        };

        tokio::task::spawn_blocking(move || -> Result<Vec<Persisted>, SatError> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(width)
                .build()
                .map_err(|e| SatError::Worker(e.to_string()))?;
            Ok(pool.install(|| {
                grids
                    .into_par_iter()
                    .map(|(locator, grid)| {
                        persist_one(&locator, &grid, &cache, &settings, renderer.as_ref())
                    })
                    .collect()
            }))
        })
        .await
        .map_err(|e| SatError::Worker(e.to_string()))?
    }

    async fn accumulate(&self, opts: &RunOptions) -> Result<AccumulateOutcome, SatError> {
        let renderer = Arc::clone(&self.renderer);
        let cache = ArchiveCache::new(&opts.output_dir);
        let prefix = self.prefix().to_string();
        let bbox = opts.bbox;
        let window = opts.window;
        let rebuild = opts.rebuild;

        tokio::task::spawn_blocking(move || {
            Accumulator::new(&cache, renderer.as_ref(), &prefix, bbox)
                .force(rebuild)
                .accumulate(&window)
        })
        .await
        .map_err(|e| SatError::Worker(e.to_string()))?
    }
}

/// Run-wide inputs to [`persist_one`].
#[derive(Debug, Clone)]
struct PersistSettings {
    prefix: String,
    bbox: BoundingBox,
    /// Write the raw archive next to the grid.
    archive: bool,
    /// Overwrite an archive that already exists.
    rebuild: bool,
}

/// Artifacts of one hour and the branch errors hit writing them.
#[derive(Debug)]
struct Persisted {
    asc_path: PathBuf,
    asc_written: bool,
    errors: Vec<SatError>,
}

fn persist_one(
    locator: &SourceLocator,
    grid: &Grid,
    cache: &ArchiveCache,
    settings: &PersistSettings,
    renderer: &dyn Renderer,
) -> Persisted {
    let mut errors = Vec::new();
    let bbox = settings.bbox;

    let asc_written = match asc::write(grid, &locator.canonical_output_path) {
        Ok(()) => true,
        Err(e) => {
            error!(instant = %locator.stamp(), error = %e, "Failed to write grid");
            errors.push(e);
            false
        }
    };

    if settings.archive {
        let key = ArchiveKey::new(&settings.prefix, locator.instant, bbox);
        if !settings.rebuild && cache.exists(&key) {
            info!(path = %cache.path_for(&key).display(), "Archive already exists");
        } else if let Err(e) = cache.write(&key, grid) {
            error!(instant = %locator.stamp(), error = %e, "Failed to archive grid");
            errors.push(e);
        }
    }

    let image = locator.image_path();
    if let Err(e) = renderer.render_grid(
        grid,
        &bbox,
        &hourly_title(locator.instant),
        &ThresholdLadder::hourly(),
        ColorScheme::Precipitation,
        &image,
    ) {
        let e = SatError::render(&image, e);
        error!(instant = %locator.stamp(), error = %e, "Failed to render grid");
        errors.push(e);
    }

    if errors.is_empty() {
        metrics::record_grid_built();
        info!(path = %locator.canonical_output_path.display(), "Wrote grid");
    }
    Persisted {
        asc_path: locator.canonical_output_path.clone(),
        asc_written,
        errors,
    }
}
